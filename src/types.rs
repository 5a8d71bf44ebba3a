use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::TIME_DIMENSION;

/// Half-open span of absolute time in 100ns ticks since the Unix epoch.
///
/// `start == end` describes an instant (a punctual annotation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        TimeRange { start, end }
    }

    pub fn instant(at: i64) -> Self {
        TimeRange { start: at, end: at }
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, time: i64) -> bool {
        time >= self.start && time < self.end
    }

    /// True when the two ranges overlap or share a boundary.
    pub fn touches(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange<T> {
    pub min: T,
    pub max: T,
}

/// Width of one stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleWidth {
    Bits8,
    Bits16,
    Bits24,
}

impl SampleWidth {
    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::Bits8 => 1,
            SampleWidth::Bits16 => 2,
            SampleWidth::Bits24 => 3,
        }
    }

    pub fn bits(self) -> u8 {
        (self.bytes() * 8) as u8
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(SampleWidth::Bits8),
            16 => Some(SampleWidth::Bits16),
            24 => Some(SampleWidth::Bits24),
            _ => None,
        }
    }

    /// Smallest and largest digital value the width can hold
    pub fn digital_limits(self) -> (i32, i32) {
        match self {
            SampleWidth::Bits8 => (i8::MIN as i32, i8::MAX as i32),
            SampleWidth::Bits16 => (i16::MIN as i32, i16::MAX as i32),
            SampleWidth::Bits24 => (-8_388_608, 8_388_607),
        }
    }
}

/// EDF+ patient identification subfields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub code: String,
    pub sex: String,
    pub birthdate: String,
    pub name: String,
    pub additional: String,
}

/// EDF+ recording identification subfields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub admin_code: String,
    pub technician: String,
    pub equipment: String,
    pub additional: String,
}

/// Fixed part of a decoded file header.
///
/// `time_range.end` is derived from `sample_period * record_count`; it is not
/// stored in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub format_version: String,
    pub patient_id: String,
    pub description: String,
    pub start_datetime: NaiveDateTime,
    pub time_range: TimeRange,
    pub header_byte_size: usize,
    pub reserved: String,
    /// Data record duration in 100ns ticks
    pub sample_period: i64,
    pub record_count: i64,
    /// Number of channels in the file, annotation channels included
    pub signal_count: usize,
    pub sample_width: SampleWidth,
}

impl Header {
    pub fn is_plus(&self) -> bool {
        self.reserved.starts_with("EDF+") || self.reserved.starts_with("BDF+")
    }

    pub fn is_discontinuous(&self) -> bool {
        self.reserved.starts_with("EDF+D") || self.reserved.starts_with("BDF+D")
    }

    pub fn duration_seconds(&self) -> f64 {
        self.time_range.duration() as f64 / TIME_DIMENSION as f64
    }

    /// 解析EDF+患者字段: "code sex birthdate name additional..."
    pub fn patient(&self) -> PatientInfo {
        let parts: Vec<&str> = self.patient_id.split_whitespace().collect();
        let field = |i: usize| parts.get(i).copied().unwrap_or("").to_string();

        PatientInfo {
            code: field(0),
            sex: field(1),
            birthdate: field(2),
            name: field(3),
            additional: parts.get(4..).map(|s| s.join(" ")).unwrap_or_default(),
        }
    }

    /// 解析EDF+记录字段: "Startdate date admincode technician equipment additional..."
    pub fn recording(&self) -> RecordingInfo {
        let parts: Vec<&str> = self.description.split_whitespace().collect();
        let field = |i: usize| parts.get(i).copied().unwrap_or("").to_string();

        RecordingInfo {
            admin_code: field(2),
            technician: field(3),
            equipment: field(4),
            additional: parts.get(5..).map(|s| s.join(" ")).unwrap_or_default(),
        }
    }
}

/// Definition of one channel, as read from the signal header columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Column index of the channel in the file
    pub id: usize,
    pub label: String,
    pub transducer_info: String,
    pub physical_unit: String,
    pub physical_range: ValueRange<f64>,
    pub digital_range: ValueRange<i32>,
    pub pre_filter_info: String,
    pub samples_per_record: usize,
    /// Physical units per digital step
    pub scale: f64,
    /// Time between two samples in 100ns ticks
    pub sampling_period: f64,
    pub is_annotation_channel: bool,
    pub sample_width_bits: u8,
}

impl SignalDefinition {
    /// 计算偏移量
    pub fn offset(&self) -> f64 {
        self.physical_range.max / self.scale - self.digital_range.max as f64
    }

    /// 将数字值转换为物理值
    pub fn to_physical(&self, digital_value: i32) -> f64 {
        self.scale * (self.offset() + digital_value as f64)
    }

    /// 将物理值转换为数字值
    pub fn to_digital(&self, physical_value: f64) -> i32 {
        let digital = (physical_value / self.scale) - self.offset();
        digital.round() as i32
    }

    pub fn sampling_rate(&self) -> f64 {
        if self.sampling_period > 0.0 {
            TIME_DIMENSION as f64 / self.sampling_period
        } else {
            0.0
        }
    }

    /// Bytes the channel occupies in one data record
    pub fn record_bytes(&self) -> usize {
        self.samples_per_record * (self.sample_width_bits as usize / 8)
    }
}

/// Samples of one channel inside a segment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSamples {
    pub signal_id: usize,
    pub time_points: Vec<i64>,
    pub values: Vec<f64>,
}

impl SignalSamples {
    pub fn new(signal_id: usize) -> Self {
        SignalSamples {
            signal_id,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn append(&mut self, mut other: SignalSamples) {
        let in_order = match (self.time_points.last(), other.time_points.first()) {
            (Some(last), Some(first)) => last <= first,
            _ => true,
        };

        self.time_points.append(&mut other.time_points);
        self.values.append(&mut other.values);

        if !in_order {
            let mut pairs: Vec<(i64, f64)> = self
                .time_points
                .drain(..)
                .zip(self.values.drain(..))
                .collect();
            pairs.sort_by_key(|(t, _)| *t);
            let (times, values) = pairs.into_iter().unzip();
            self.time_points = times;
            self.values = values;
        }
    }
}

/// Time-stamped free-text annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub time_range: TimeRange,
    pub notes: Vec<String>,
}

impl Annotation {
    pub fn is_punctual(&self) -> bool {
        self.time_range.start == self.time_range.end
    }
}

/// Samples and annotations decoded from one buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub time_range: TimeRange,
    pub signals: Vec<SignalSamples>,
    pub annotations: Vec<Annotation>,
}

impl Segment {
    pub fn samples_for(&self, signal_id: usize) -> Option<&SignalSamples> {
        self.signals.iter().find(|s| s.signal_id == signal_id)
    }

    /// Folds another segment into this one.
    ///
    /// Segments may arrive newest-first; samples are kept sorted by time point
    /// and annotations by start time either way.
    pub fn merge(&mut self, other: Segment) {
        self.time_range = self.time_range.union(&other.time_range);

        for samples in other.signals {
            match self
                .signals
                .iter_mut()
                .find(|s| s.signal_id == samples.signal_id)
            {
                Some(existing) => existing.append(samples),
                None => self.signals.push(samples),
            }
        }

        self.annotations.extend(other.annotations);
        self.annotations.sort_by_key(|a| a.time_range.start);
    }
}
