//! # EDF+ Streaming Library for Rust
//!
//! A pure Rust library for following EDF+ (European Data Format Plus)
//! recordings that arrive as a series of segment files in remote storage.
//! It decodes each segment in memory, polls storage incrementally for new
//! segments, and keeps a video element and a chart view on one timeline.
//!
//! ## Quick Start
//!
//! ### Decoding a segment
//!
//! ```rust
//! use edfstream::{decode, Result, TIME_DIMENSION};
//!
//! fn main() -> Result<()> {
//!     # let bytes = edfstream::doctest_utils::simple_recording_bytes()?;
//!     // `bytes` holds one complete EDF+ file
//!     let decoded = decode(&bytes)?;
//!
//!     // Get file information
//!     let header = &decoded.header;
//!     println!("Number of signals: {}", decoded.definitions.len());
//!     println!("Duration: {:.2} seconds", header.duration_seconds());
//!
//!     // Samples carry absolute timestamps in 100ns ticks
//!     let samples = &decoded.segment.signals[0];
//!     assert_eq!(samples.time_points[0], header.time_range.start);
//!     assert_eq!(header.time_range.duration(), 2 * TIME_DIMENSION);
//!     Ok(())
//! }
//! ```
//!
//! ### Following a folder of segments
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//! use edfstream::{InMemoryStorage, ManualScheduler, OrderingPolicy, SegmentSource, SessionBuffer};
//!
//! # fn main() -> edfstream::Result<()> {
//! let storage = Rc::new(InMemoryStorage::new());
//! storage.put("study/0001.edf", edfstream::doctest_utils::simple_recording_bytes()?, 1_000);
//!
//! let scheduler = Rc::new(ManualScheduler::new());
//! let session = Rc::new(RefCell::new(SessionBuffer::new()));
//! let source = SegmentSource::new(
//!     storage.clone(),
//!     "study",
//!     OrderingPolicy::Ascending,
//!     session.clone(),
//!     scheduler.clone(),
//! );
//!
//! source.start(Duration::from_secs(5));
//! scheduler.run_due();
//! assert_eq!(session.borrow().segments_received(), 1);
//!
//! // A new segment shows up on the next poll
//! # let later = chrono::NaiveDate::from_ymd_opt(1985, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 2)).unwrap();
//! storage.put("study/0002.edf", edfstream::doctest_utils::recording_bytes_at(later, 1)?, 2_000);
//! scheduler.advance(Duration::from_secs(5));
//! assert_eq!(session.borrow().segments_received(), 2);
//! assert_eq!(session.borrow().coverage().len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Working with Signal Data
//!
//! ### Physical vs Digital Values
//!
//! Samples are stored as 16-bit (EDF) or 24-bit (BDF) integers that map
//! linearly onto the physical range of the signal:
//!
//! ```rust
//! # fn main() -> edfstream::Result<()> {
//! # let bytes = edfstream::doctest_utils::simple_recording_bytes()?;
//! let decoded = edfstream::decode(&bytes)?;
//! let signal = &decoded.definitions[0];   // ±200 µV over -32768..32767
//!
//! let physical_value = signal.to_physical(16384);
//! assert!((physical_value - 100.0).abs() < 0.1);
//!
//! let digital_value = signal.to_digital(50.0);
//! assert!((digital_value - 8192).abs() <= 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Timeline
//!
//! The [`TimelineController`] clamps seeks into the session, lets exactly one
//! of the two views drive time, and stalls playback while the chart waits for
//! data, resuming on its own once the data has loaded.

pub mod annotation;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod storage;
pub mod timeline;
pub mod types;
pub mod utils;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use annotation::{parse_annotation_block, AnnotationBlock};
pub use config::{SourceConfig, TimelineConfig};
pub use decoder::{decode, decode_header, decode_with, DecodeOptions, Decoded};
pub use encoder::{EdfEncoder, SignalSpec};
pub use error::{EdfError, Result};
pub use protocol::{Request, Response, ResponseSink, SourceHost};
pub use scheduler::{ManualScheduler, Scheduler, Task};
pub use session::{SessionBuffer, SessionChart};
pub use source::{CycleOutcome, OrderingPolicy, SegmentSink, SegmentSource, SourceHandle};
pub use storage::{Credentials, InMemoryStorage, ListPage, ObjectDescriptor, ObjectStorage};
pub use timeline::{
    ChartSink, Clock, Driver, ManualClock, PlaybackMode, Restore, SyncLoop, SystemClock, TickOutcome,
    TimelineController, VideoSink,
};
pub use types::{
    Annotation, Header, PatientInfo, RecordingInfo, SampleWidth, Segment, SignalDefinition, SignalSamples,
    TimeRange, ValueRange,
};

// Important constants
pub const TIME_DIMENSION: i64 = 10_000_000; // 100 nanoseconds unit
pub const MAX_SIGNALS: usize = 4096;
pub const ANNOTATION_LABEL: &str = "EDF Annotations";
pub const BDF_ANNOTATION_LABEL: &str = "BDF Annotations";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
/// Largest ranged read issued by [`ObjectStorage::fetch_bytes`]
pub const FETCH_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Library version
///
/// Returns the current version of the edfstream library.
///
/// # Examples
///
/// ```rust
/// let version = edfstream::version();
/// assert!(!version.is_empty());
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
