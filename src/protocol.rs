//! Message boundary of the segment source.
//!
//! A host receives [`Request`]s (possibly as JSON lines), owns at most one
//! [`SegmentSource`] built on `Initialize`, and reports everything the source
//! produces as [`Response`]s.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{EdfError, Result};
use crate::scheduler::Scheduler;
use crate::source::{OrderingPolicy, SegmentSink, SegmentSource};
use crate::storage::{Credentials, ObjectStorage};
use crate::types::{Header, Segment, SignalDefinition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Initialize {
        #[serde(default)]
        credentials: Option<Credentials>,
        folder: String,
        #[serde(default)]
        ordering: OrderingPolicy,
    },
    Start {
        poll_interval_ms: u64,
    },
    Stop,
    Dispose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    DefinitionsReady {
        header: Header,
        definitions: Vec<SignalDefinition>,
    },
    SegmentReady {
        segment: Segment,
    },
    Disposed,
}

/// Sink that turns source callbacks into responses
pub struct ResponseSink<R> {
    respond: Rc<RefCell<R>>,
}

impl<R: FnMut(Response)> SegmentSink for ResponseSink<R> {
    fn on_definitions_ready(&mut self, header: &Header, definitions: &[SignalDefinition]) {
        (self.respond.borrow_mut())(Response::DefinitionsReady {
            header: header.clone(),
            definitions: definitions.to_vec(),
        });
    }

    fn on_segment_ready(&mut self, segment: Segment) {
        (self.respond.borrow_mut())(Response::SegmentReady { segment });
    }

    fn on_disposed(&mut self) {
        (self.respond.borrow_mut())(Response::Disposed);
    }
}

/// Owns the segment source behind the request/response boundary.
///
/// `factory` builds a storage client from the optional credentials of an
/// `Initialize` request; `respond` receives every response.
///
/// # Examples
///
/// ```rust
/// use std::rc::Rc;
/// use std::cell::RefCell;
/// use edfstream::{InMemoryStorage, ManualScheduler, Response, SourceHost};
///
/// let storage = Rc::new(InMemoryStorage::new());
/// storage.put("live/0001.edf", edfstream::doctest_utils::simple_recording_bytes()?, 10);
///
/// let responses = Rc::new(RefCell::new(Vec::new()));
/// let sink = responses.clone();
/// let scheduler = Rc::new(ManualScheduler::new());
///
/// let mut host = SourceHost::new(
///     move |_credentials| Ok(storage.clone()),
///     scheduler.clone(),
///     move |response| sink.borrow_mut().push(response),
/// );
///
/// host.handle_json(r#"{"type":"initialize","folder":"live","ordering":"descending"}"#)?;
/// host.handle_json(r#"{"type":"start","poll_interval_ms":1000}"#)?;
/// scheduler.run_due();
/// host.handle_json(r#"{"type":"dispose"}"#)?;
///
/// let responses = responses.borrow();
/// assert!(matches!(responses[0], Response::DefinitionsReady { .. }));
/// assert!(matches!(responses[1], Response::SegmentReady { .. }));
/// assert_eq!(responses[2], Response::Disposed);
/// # Ok::<(), edfstream::EdfError>(())
/// ```
pub struct SourceHost<S, F, R>
where
    S: ObjectStorage + 'static,
    F: FnMut(Option<&Credentials>) -> Result<S>,
    R: FnMut(Response) + 'static,
{
    factory: F,
    scheduler: Rc<dyn Scheduler>,
    respond: Rc<RefCell<R>>,
    source: Option<SegmentSource<S, ResponseSink<R>>>,
}

impl<S, F, R> SourceHost<S, F, R>
where
    S: ObjectStorage + 'static,
    F: FnMut(Option<&Credentials>) -> Result<S>,
    R: FnMut(Response) + 'static,
{
    pub fn new(factory: F, scheduler: Rc<dyn Scheduler>, respond: R) -> Self {
        SourceHost {
            factory,
            scheduler,
            respond: Rc::new(RefCell::new(respond)),
            source: None,
        }
    }

    /// Applies one request.
    ///
    /// A second `Initialize` disposes the current source first. `Stop` and
    /// `Dispose` without a source are no-ops.
    pub fn handle(&mut self, request: Request) -> Result<()> {
        match request {
            Request::Initialize {
                credentials,
                folder,
                ordering,
            } => {
                if let Some(previous) = self.source.take() {
                    previous.dispose();
                }
                let storage = (self.factory)(credentials.as_ref())?;
                info!("initialized source for {} ({:?})", folder, ordering);
                self.source = Some(SegmentSource::new(
                    storage,
                    folder,
                    ordering,
                    ResponseSink {
                        respond: self.respond.clone(),
                    },
                    self.scheduler.clone(),
                ));
            }
            Request::Start { poll_interval_ms } => {
                let source = self.source.as_ref().ok_or_else(|| {
                    EdfError::InvalidRequest("start received before initialize".to_string())
                })?;
                source.start(Duration::from_millis(poll_interval_ms));
            }
            Request::Stop => {
                if let Some(source) = &self.source {
                    source.stop();
                }
            }
            Request::Dispose => {
                if let Some(source) = self.source.take() {
                    source.dispose();
                }
            }
        }
        Ok(())
    }

    /// Parses one JSON request line and applies it
    pub fn handle_json(&mut self, line: &str) -> Result<()> {
        let request: Request = serde_json::from_str(line.trim())?;
        self.handle(request)
    }

    pub fn source(&self) -> Option<&SegmentSource<S, ResponseSink<R>>> {
        self.source.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shapes() {
        let request: Request = serde_json::from_str(
            r#"{"type":"initialize","folder":"a/b","credentials":{"access_key_id":"id","secret_access_key":"s"}}"#,
        )
        .unwrap();
        match request {
            Request::Initialize {
                credentials,
                folder,
                ordering,
            } => {
                assert_eq!(folder, "a/b");
                assert_eq!(ordering, OrderingPolicy::Ascending);
                let credentials = credentials.unwrap();
                assert_eq!(credentials.access_key_id, "id");
                assert_eq!(credentials.session_token, None);
            }
            other => panic!("unexpected request {:?}", other),
        }

        let stop: Request = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(stop, Request::Stop);

        let json = serde_json::to_string(&Response::Disposed).unwrap();
        assert_eq!(json, r#"{"type":"disposed"}"#);
    }
}
