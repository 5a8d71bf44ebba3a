use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::source::SegmentSink;
use crate::timeline::ChartSink;
use crate::types::{Annotation, Header, Segment, SignalDefinition, TimeRange};

/// Consumer-side view of a session assembled from delivered segments.
///
/// Segments may arrive in any order; samples stay sorted by time and the
/// loaded time span is tracked as a set of disjoint ranges.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    header: Option<Header>,
    definitions: Vec<SignalDefinition>,
    merged: Option<Segment>,
    coverage: Vec<TimeRange>,
    segments_received: usize,
    disposed: bool,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header of the first decoded object
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn definitions(&self) -> &[SignalDefinition] {
        &self.definitions
    }

    pub fn segment(&self) -> Option<&Segment> {
        self.merged.as_ref()
    }

    pub fn annotations(&self) -> &[Annotation] {
        self.merged
            .as_ref()
            .map(|s| s.annotations.as_slice())
            .unwrap_or(&[])
    }

    /// Disjoint loaded ranges, sorted by start
    pub fn coverage(&self) -> &[TimeRange] {
        &self.coverage
    }

    /// True when `time` lies inside loaded data, end included
    pub fn covers(&self, time: i64) -> bool {
        self.coverage
            .iter()
            .any(|range| range.start <= time && time <= range.end)
    }

    /// End of the loaded span that contains `time`
    pub fn loaded_until(&self, time: i64) -> Option<i64> {
        self.coverage
            .iter()
            .find(|range| range.start <= time && time <= range.end)
            .map(|range| range.end)
    }

    pub fn segments_received(&self) -> usize {
        self.segments_received
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn add_coverage(&mut self, range: TimeRange) {
        self.coverage.push(range);
        self.coverage.sort_by_key(|r| r.start);

        let mut coalesced: Vec<TimeRange> = Vec::with_capacity(self.coverage.len());
        for range in self.coverage.drain(..) {
            match coalesced.last_mut() {
                Some(last) if last.touches(&range) => *last = last.union(&range),
                _ => coalesced.push(range),
            }
        }
        self.coverage = coalesced;
    }
}

impl SegmentSink for SessionBuffer {
    fn on_definitions_ready(&mut self, header: &Header, definitions: &[SignalDefinition]) {
        self.header = Some(header.clone());
        self.definitions = definitions.to_vec();
    }

    fn on_segment_ready(&mut self, segment: Segment) {
        self.segments_received += 1;
        self.add_coverage(segment.time_range);
        debug!("session coverage now {} range(s)", self.coverage.len());

        match self.merged.as_mut() {
            Some(merged) => merged.merge(segment),
            None => self.merged = Some(segment),
        }
    }

    fn on_disposed(&mut self) {
        self.disposed = true;
    }
}

/// Chart view over a shared [`SessionBuffer`].
///
/// Ready for playback once the buffer covers the current time.
pub struct SessionChart {
    buffer: Rc<RefCell<SessionBuffer>>,
    range: TimeRange,
    offset: i64,
}

impl SessionChart {
    pub fn new(buffer: Rc<RefCell<SessionBuffer>>) -> Self {
        SessionChart {
            buffer,
            range: TimeRange::default(),
            offset: 0,
        }
    }

    pub fn time_range(&self) -> TimeRange {
        self.range
    }

    /// Absolute time under the cursor
    pub fn absolute_time(&self) -> i64 {
        self.range.start + self.offset
    }
}

impl ChartSink for SessionChart {
    fn current_time(&self) -> i64 {
        self.offset
    }

    fn set_current_time(&mut self, offset: i64) {
        self.offset = offset;
    }

    fn shift_current_time(&mut self, delta: i64) {
        self.offset += delta;
    }

    fn ready_for_playback(&self) -> bool {
        let time = self.absolute_time();
        self.buffer
            .try_borrow()
            .map_or(false, |buffer| buffer.covers(time))
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.range = range;
    }
}
