//! Incremental segment source.
//!
//! A [`SegmentSource`] polls a remote folder for objects modified since the
//! last one it delivered, fetches and decodes them one at a time, and hands
//! the results to a [`SegmentSink`]. The poll loop paces itself: the next
//! cycle is armed when the current one finishes, never on a fixed cadence.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::decoder::{decode, Decoded};
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::storage::{ObjectDescriptor, ObjectStorage};
use crate::types::{Header, Segment, SignalDefinition};

/// Order in which the objects of one poll cycle are processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingPolicy {
    /// Oldest first; rebuilds a completed session from its beginning
    #[default]
    Ascending,
    /// Newest first; a live session shows its leading edge before backfilling
    Descending,
}

impl OrderingPolicy {
    pub fn sort(self, objects: &mut [ObjectDescriptor]) {
        objects.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        });
        if self == OrderingPolicy::Descending {
            objects.reverse();
        }
    }
}

/// Receiver of decoded artifacts
pub trait SegmentSink {
    /// Called once, for the first object decoded during the source's lifetime
    fn on_definitions_ready(&mut self, header: &Header, definitions: &[SignalDefinition]);

    /// Called for every decoded object
    fn on_segment_ready(&mut self, segment: Segment);

    fn on_disposed(&mut self) {}
}

impl<T: SegmentSink + ?Sized> SegmentSink for Rc<RefCell<T>> {
    fn on_definitions_ready(&mut self, header: &Header, definitions: &[SignalDefinition]) {
        self.borrow_mut().on_definitions_ready(header, definitions);
    }

    fn on_segment_ready(&mut self, segment: Segment) {
        self.borrow_mut().on_segment_ready(segment);
    }

    fn on_disposed(&mut self) {
        self.borrow_mut().on_disposed();
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was in flight, or the source is stopped or gone
    Skipped,
    /// The listing failed; nothing was fetched
    ListFailed,
    /// Every listed object was delivered
    Completed { delivered: usize },
    /// An object failed to fetch or decode; the rest of the cycle was dropped
    Abandoned { delivered: usize, failed_key: String },
}

#[derive(Debug, Default)]
struct Cursor {
    loaded: HashSet<String>,
    high_water_mark: Option<i64>,
    definitions_sent: bool,
}

struct Shared<S, K> {
    storage: S,
    folder: String,
    ordering: OrderingPolicy,
    sink: RefCell<K>,
    cursor: RefCell<Cursor>,
    scheduler: Rc<dyn Scheduler>,
    poll_interval: Cell<Option<Duration>>,
    generation: Cell<u64>,
    in_flight: Cell<bool>,
    rearm: Cell<bool>,
    disposed: Cell<bool>,
}

/// Polls a folder of segment files and delivers each decoded object once.
///
/// # Examples
///
/// ```rust
/// use std::rc::Rc;
/// use std::time::Duration;
/// use edfstream::{
///     Header, InMemoryStorage, ManualScheduler, OrderingPolicy, Segment, SegmentSink,
///     SegmentSource, SignalDefinition,
/// };
///
/// #[derive(Default)]
/// struct Counter { definitions: usize, segments: usize }
///
/// impl SegmentSink for Counter {
///     fn on_definitions_ready(&mut self, _: &Header, _: &[SignalDefinition]) {
///         self.definitions += 1;
///     }
///     fn on_segment_ready(&mut self, _: Segment) {
///         self.segments += 1;
///     }
/// }
///
/// let storage = Rc::new(InMemoryStorage::new());
/// let bytes = edfstream::doctest_utils::simple_recording_bytes()?;
/// storage.put("session-1/0001.edf", bytes.clone(), 1_000);
/// storage.put("session-1/0002.edf", bytes, 2_000);
///
/// let scheduler = Rc::new(ManualScheduler::new());
/// let source = SegmentSource::new(
///     storage.clone(),
///     "session-1",
///     OrderingPolicy::Ascending,
///     Counter::default(),
///     scheduler.clone(),
/// );
///
/// source.start(Duration::from_secs(5));
/// scheduler.run_due();
///
/// assert_eq!(source.sink().definitions, 1);
/// assert_eq!(source.sink().segments, 2);
/// assert_eq!(source.high_water_mark(), Some(2_000));
/// # Ok::<(), edfstream::EdfError>(())
/// ```
pub struct SegmentSource<S, K>
where
    S: ObjectStorage + 'static,
    K: SegmentSink + 'static,
{
    shared: Rc<Shared<S, K>>,
}

impl<S, K> SegmentSource<S, K>
where
    S: ObjectStorage + 'static,
    K: SegmentSink + 'static,
{
    pub fn new(
        storage: S,
        folder: impl Into<String>,
        ordering: OrderingPolicy,
        sink: K,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        SegmentSource {
            shared: Rc::new(Shared {
                storage,
                folder: folder.into(),
                ordering,
                sink: RefCell::new(sink),
                cursor: RefCell::new(Cursor::default()),
                scheduler,
                poll_interval: Cell::new(None),
                generation: Cell::new(0),
                in_flight: Cell::new(false),
                rearm: Cell::new(false),
                disposed: Cell::new(false),
            }),
        }
    }

    /// Starts (or restarts) the poll loop; the first cycle runs on the next
    /// scheduler turn.
    pub fn start(&self, poll_interval: Duration) {
        let shared = &self.shared;
        if shared.disposed.get() {
            warn!("start ignored: source for {} is disposed", shared.folder);
            return;
        }

        info!(
            "polling {} every {:?} ({:?})",
            shared.folder, poll_interval, shared.ordering
        );
        shared.poll_interval.set(Some(poll_interval));
        shared.rearm.set(false);
        let generation = shared.generation.get() + 1;
        shared.generation.set(generation);
        Shared::schedule_tick(shared, Duration::ZERO, generation);
    }

    /// Clears the poll interval. A cycle in flight completes but is not
    /// followed by another one.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Stops polling and notifies the sink
    pub fn dispose(self) {
        let shared = &self.shared;
        shared.stop();
        shared.disposed.set(true);
        info!("source for {} disposed", shared.folder);
        shared.sink.borrow_mut().on_disposed();
    }

    /// Runs one cycle now, unless one is already in flight
    pub fn poll_now(&self) -> CycleOutcome {
        Shared::run_cycle(&self.shared)
    }

    pub fn handle(&self) -> SourceHandle<S, K> {
        SourceHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.poll_interval.get().is_some()
    }

    /// True while a poll cycle is in flight
    pub fn is_polling(&self) -> bool {
        self.shared.in_flight.get()
    }

    pub fn folder(&self) -> &str {
        &self.shared.folder
    }

    pub fn ordering(&self) -> OrderingPolicy {
        self.shared.ordering
    }

    /// Latest modification time among delivered objects, committed when a
    /// cycle ends. Only objects modified after it are listed.
    pub fn high_water_mark(&self) -> Option<i64> {
        self.shared.cursor.borrow().high_water_mark
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.shared.cursor.borrow().loaded.contains(key)
    }

    pub fn loaded_count(&self) -> usize {
        self.shared.cursor.borrow().loaded.len()
    }

    pub fn sink(&self) -> Ref<'_, K> {
        self.shared.sink.borrow()
    }
}

/// Weak handle to a [`SegmentSource`], usable from its own sink callbacks
pub struct SourceHandle<S, K> {
    shared: Weak<Shared<S, K>>,
}

impl<S, K> Clone for SourceHandle<S, K> {
    fn clone(&self) -> Self {
        SourceHandle {
            shared: self.shared.clone(),
        }
    }
}

impl<S, K> SourceHandle<S, K>
where
    S: ObjectStorage + 'static,
    K: SegmentSink + 'static,
{
    pub fn poll_now(&self) -> CycleOutcome {
        match self.shared.upgrade() {
            Some(shared) => Shared::run_cycle(&shared),
            None => CycleOutcome::Skipped,
        }
    }

    pub fn stop(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.stop();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(false, |shared| !shared.disposed.get())
    }
}

impl<S, K> Shared<S, K>
where
    S: ObjectStorage + 'static,
    K: SegmentSink + 'static,
{
    fn stop(&self) {
        if self.poll_interval.take().is_some() {
            info!("polling of {} stopped", self.folder);
        }
        self.rearm.set(false);
        self.generation.set(self.generation.get() + 1);
    }

    fn schedule_tick(this: &Rc<Self>, delay: Duration, generation: u64) {
        let weak = Rc::downgrade(this);
        this.scheduler.schedule_after(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    Shared::on_timer(&shared, generation);
                }
            }),
        );
    }

    fn on_timer(this: &Rc<Self>, generation: u64) {
        if generation != this.generation.get() || this.poll_interval.get().is_none() {
            return;
        }

        this.rearm.set(true);
        if this.in_flight.get() {
            debug!("poll of {} still in flight, timer tick ignored", this.folder);
            return;
        }
        Shared::run_cycle(this);
    }

    fn run_cycle(this: &Rc<Self>) -> CycleOutcome {
        if this.disposed.get() || this.in_flight.replace(true) {
            return CycleOutcome::Skipped;
        }

        let outcome = this.poll_once();
        this.in_flight.set(false);

        // 下一轮从本轮结束时开始计时
        if this.rearm.replace(false) {
            if let Some(interval) = this.poll_interval.get() {
                Shared::schedule_tick(this, interval, this.generation.get());
            }
        }

        outcome
    }

    fn poll_once(&self) -> CycleOutcome {
        let since = self.cursor.borrow().high_water_mark;

        let listed = match self.storage.list_objects_modified_after(&self.folder, since) {
            Ok(listed) => listed,
            Err(e) => {
                warn!("listing {} failed, retrying next cycle: {}", self.folder, e);
                return CycleOutcome::ListFailed;
            }
        };

        let mut pending: Vec<ObjectDescriptor> = {
            let cursor = self.cursor.borrow();
            listed
                .into_iter()
                .filter(|o| !cursor.loaded.contains(&o.key))
                .collect()
        };
        self.ordering.sort(&mut pending);

        if !pending.is_empty() {
            debug!("{} new objects in {}", pending.len(), self.folder);
        }

        let mut delivered = 0;
        let mut cycle_high: Option<i64> = None;
        for (index, object) in pending.iter().enumerate() {
            if self.disposed.get() {
                break;
            }

            let decoded = match self.fetch_and_decode(object) {
                Ok(decoded) => decoded,
                Err(e) => {
                    error!(
                        "failed to load {} ({} bytes), abandoning cycle: {}",
                        object.key, object.size, e
                    );
                    // 失败对象及本轮未处理的对象都必须留在高水位之上
                    let floor = pending[index..]
                        .iter()
                        .map(|o| o.last_modified)
                        .min()
                        .unwrap_or(object.last_modified);
                    self.advance_high_water_mark(cycle_high.map(|high| high.min(floor - 1)));
                    return CycleOutcome::Abandoned {
                        delivered,
                        failed_key: object.key.clone(),
                    };
                }
            };

            cycle_high = Some(cycle_high.map_or(object.last_modified, |high: i64| high.max(object.last_modified)));
            let first = {
                let mut cursor = self.cursor.borrow_mut();
                cursor.loaded.insert(object.key.clone());
                !std::mem::replace(&mut cursor.definitions_sent, true)
            };

            let Decoded {
                header,
                definitions,
                segment,
                ..
            } = decoded;

            let mut sink = self.sink.borrow_mut();
            if first {
                info!(
                    "{} signal definitions from {}",
                    definitions.len(),
                    object.key
                );
                sink.on_definitions_ready(&header, &definitions);
            }
            debug!(
                "segment {} covers {}..{}",
                object.key, segment.time_range.start, segment.time_range.end
            );
            sink.on_segment_ready(segment);
            delivered += 1;
        }

        self.advance_high_water_mark(cycle_high);
        CycleOutcome::Completed { delivered }
    }

    /// The mark never moves backwards
    fn advance_high_water_mark(&self, candidate: Option<i64>) {
        let mut cursor = self.cursor.borrow_mut();
        if let Some(candidate) = candidate {
            if cursor.high_water_mark.map_or(true, |hwm| candidate > hwm) {
                cursor.high_water_mark = Some(candidate);
            }
        }
    }

    fn fetch_and_decode(&self, object: &ObjectDescriptor) -> Result<Decoded> {
        let bytes = self.storage.fetch_bytes(&object.key, object.size)?;
        decode(&bytes)
    }
}
