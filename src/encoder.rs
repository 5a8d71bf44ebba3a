use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::annotation::{DURATION_MARK, FIELD_END, RECORD_END};
use crate::error::{EdfError, Result};
use crate::types::SampleWidth;
use crate::utils::{format_edf_time, to_ascii};
use crate::{ANNOTATION_LABEL, BDF_ANNOTATION_LABEL, TIME_DIMENSION};

/// TAL bytes reserved per data record for the annotation channel
pub const DEFAULT_ANNOTATION_BYTES: usize = 120;

/// Parameters of one signal channel to encode
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    pub label: String,
    pub transducer: String,
    pub physical_unit: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub prefilter: String,
    pub samples_per_record: usize,
}

impl SignalSpec {
    /// 计算物理值转换参数
    fn bit_value(&self) -> f64 {
        (self.physical_max - self.physical_min) / (self.digital_max - self.digital_min) as f64
    }

    /// 将物理值转换为数字值
    pub fn to_digital(&self, physical_value: f64) -> i32 {
        let offset = self.physical_max / self.bit_value() - self.digital_max as f64;
        let digital = (physical_value / self.bit_value()) - offset;
        (digital.round() as i64).clamp(self.digital_min as i64, self.digital_max as i64) as i32
    }
}

#[derive(Debug, Clone)]
struct PendingAnnotation {
    onset: i64,
    duration: Option<i64>,
    notes: Vec<String>,
}

/// Builds EDF+/BDF+ buffers in memory.
///
/// Produces the same layout [`decode`](crate::decode) reads: a 256-byte
/// fixed header, column-major signal headers with the annotation channel
/// last, then the data records. Each record's annotation block starts with a
/// timekeeping TAL.
///
/// # Examples
///
/// ```rust
/// use edfstream::{decode, EdfEncoder, SignalSpec};
///
/// let mut encoder = EdfEncoder::new();
/// encoder.add_signal(SignalSpec {
///     label: "ECG".to_string(),
///     transducer: "".to_string(),
///     physical_unit: "mV".to_string(),
///     physical_min: -5.0,
///     physical_max: 5.0,
///     digital_min: -2048,
///     digital_max: 2047,
///     prefilter: "".to_string(),
///     samples_per_record: 100,
/// })?;
/// encoder.add_annotation(0.25, None, &["R peak"])?;
/// encoder.write_physical_record(&[vec![0.0; 100]])?;
///
/// let decoded = decode(&encoder.encode()?)?;
/// assert_eq!(decoded.definitions[0].label, "ECG");
/// assert_eq!(decoded.segment.annotations.len(), 1);
/// # Ok::<(), edfstream::EdfError>(())
/// ```
#[derive(Debug, Clone)]
pub struct EdfEncoder {
    signals: Vec<SignalSpec>,
    start: NaiveDateTime,
    record_duration: i64,
    sample_width: SampleWidth,
    annotation_bytes: usize,
    live: bool,

    // EDF+ 字段
    patient_code: String,
    sex: String,
    birthdate: String,
    patient_name: String,
    admin_code: String,
    technician: String,
    equipment: String,

    annotations: Vec<PendingAnnotation>,
    records: Vec<Vec<Vec<i32>>>,
}

impl Default for EdfEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EdfEncoder {
    /// Creates an encoder with anonymized ("X") identification fields, a
    /// start of 1985-01-01 00:00:00, 1-second records and 16-bit samples.
    pub fn new() -> Self {
        let start = NaiveDate::from_ymd_opt(1985, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();

        EdfEncoder {
            signals: Vec::new(),
            start,
            record_duration: TIME_DIMENSION,
            sample_width: SampleWidth::Bits16,
            annotation_bytes: DEFAULT_ANNOTATION_BYTES,
            live: false,
            patient_code: "X".to_string(),
            sex: "X".to_string(),
            birthdate: "X".to_string(),
            patient_name: "X".to_string(),
            admin_code: "X".to_string(),
            technician: "X".to_string(),
            equipment: "X".to_string(),
            annotations: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn set_patient_info(&mut self, code: &str, sex: &str, birthdate: &str, name: &str) {
        self.patient_code = subfield(code);
        self.sex = subfield(sex);
        self.birthdate = subfield(birthdate);
        self.patient_name = subfield(name);
    }

    pub fn set_recording_info(&mut self, admin_code: &str, technician: &str, equipment: &str) {
        self.admin_code = subfield(admin_code);
        self.technician = subfield(technician);
        self.equipment = subfield(equipment);
    }

    /// Sets the start date/time; sub-second parts are dropped
    pub fn set_start(&mut self, start: NaiveDateTime) {
        self.start = start.with_nanosecond(0).unwrap_or(start);
    }

    pub fn set_record_duration(&mut self, duration_seconds: f64) -> Result<()> {
        if !(duration_seconds > 0.0) {
            return Err(EdfError::InvalidFormat(format!(
                "Record duration must be positive, got {}",
                duration_seconds
            )));
        }
        let ticks = (duration_seconds * TIME_DIMENSION as f64).round() as i64;
        if format_edf_time(ticks).len() > 8 {
            return Err(EdfError::InvalidFormat(format!(
                "Record duration {} does not fit in 8 characters",
                duration_seconds
            )));
        }
        self.record_duration = ticks;
        Ok(())
    }

    /// 24-bit switches the output to BDF+
    pub fn set_sample_width(&mut self, width: SampleWidth) {
        self.sample_width = width;
    }

    pub fn set_annotation_bytes(&mut self, bytes: usize) -> Result<()> {
        if bytes < 16 {
            return Err(EdfError::InvalidFormat(format!(
                "Annotation block of {} bytes is too small",
                bytes
            )));
        }
        self.annotation_bytes = bytes;
        Ok(())
    }

    /// Writes `-1` as record count, as a recorder does while still writing
    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    pub fn add_signal(&mut self, signal: SignalSpec) -> Result<()> {
        if !self.records.is_empty() {
            return Err(EdfError::InvalidFormat(
                "Cannot add signals after records were written".to_string(),
            ));
        }
        if signal.physical_min == signal.physical_max {
            return Err(EdfError::InvalidFormat(format!(
                "Physical min equals physical max for {}",
                signal.label
            )));
        }
        if signal.digital_min >= signal.digital_max {
            return Err(EdfError::InvalidFormat(format!(
                "Digital min must be below digital max for {}",
                signal.label
            )));
        }
        if signal.samples_per_record == 0 {
            return Err(EdfError::InvalidFormat(format!(
                "Signal {} needs at least one sample per record",
                signal.label
            )));
        }
        self.signals.push(signal);
        Ok(())
    }

    /// Adds an annotation; onset in seconds since the start.
    ///
    /// It is stored in the record whose time span contains the onset and is
    /// lost if no written record covers it.
    pub fn add_annotation(&mut self, onset_seconds: f64, duration_seconds: Option<f64>, notes: &[&str]) -> Result<()> {
        if notes.is_empty() {
            return Err(EdfError::InvalidFormat("Annotation needs at least one note".to_string()));
        }
        if let Some(duration) = duration_seconds {
            if duration < 0.0 {
                return Err(EdfError::InvalidFormat(format!("Negative duration {}", duration)));
            }
        }

        self.annotations.push(PendingAnnotation {
            onset: (onset_seconds * TIME_DIMENSION as f64).round() as i64,
            duration: duration_seconds.map(|d| (d * TIME_DIMENSION as f64).round() as i64),
            notes: notes.iter().map(|n| n.to_string()).collect(),
        });
        Ok(())
    }

    /// Appends one record of physical values, one vector per signal
    pub fn write_physical_record(&mut self, samples: &[Vec<f64>]) -> Result<()> {
        self.check_record_shape(samples.iter().map(Vec::len))?;
        let record = self
            .signals
            .iter()
            .zip(samples)
            .map(|(spec, values)| values.iter().map(|&v| spec.to_digital(v)).collect())
            .collect();
        self.records.push(record);
        Ok(())
    }

    /// Appends one record of raw digital values, one vector per signal
    pub fn write_digital_record(&mut self, samples: &[Vec<i32>]) -> Result<()> {
        self.check_record_shape(samples.iter().map(Vec::len))?;
        self.records.push(samples.to_vec());
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn check_record_shape(&self, lengths: impl ExactSizeIterator<Item = usize>) -> Result<()> {
        if lengths.len() != self.signals.len() {
            return Err(EdfError::InvalidFormat(format!(
                "Expected {} sample vectors, got {}",
                self.signals.len(),
                lengths.len()
            )));
        }
        for (spec, len) in self.signals.iter().zip(lengths) {
            if len != spec.samples_per_record {
                return Err(EdfError::InvalidFormat(format!(
                    "Signal {} expects {} samples per record, got {}",
                    spec.label, spec.samples_per_record, len
                )));
            }
        }
        Ok(())
    }

    /// Serializes header and all written records
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.signals.is_empty() {
            return Err(EdfError::InvalidFormat("No signals added".to_string()));
        }

        let width = self.sample_width;
        let (width_min, width_max) = width.digital_limits();
        for spec in &self.signals {
            if spec.digital_min < width_min || spec.digital_max > width_max {
                return Err(EdfError::InvalidFormat(format!(
                    "Digital range of {} exceeds {}-bit samples",
                    spec.label,
                    width.bits()
                )));
            }
        }

        let is_bdf = width == SampleWidth::Bits24;
        let annotation_samples = self.annotation_bytes.div_ceil(width.bytes());
        let annotation_block = annotation_samples * width.bytes();
        let total_signals = self.signals.len() + 1;
        let header_size = (total_signals + 1) * 256;

        let mut out = Vec::with_capacity(header_size);

        // 主头部 (256字节)
        if is_bdf {
            out.push(0xFF);
            out.extend_from_slice(b"BIOSEMI");
        } else {
            push_field(&mut out, "0", 8);
        }

        let patient_field = format!(
            "{} {} {} {}",
            self.patient_code, self.sex, self.birthdate, self.patient_name
        );
        push_field(&mut out, &patient_field, 80);

        let recording_field = format!(
            "Startdate {:02}-{}-{:04} {} {} {}",
            self.start.day(),
            self.start.format("%b").to_string().to_uppercase(),
            self.start.year(),
            self.admin_code,
            self.technician,
            self.equipment
        );
        push_field(&mut out, &recording_field, 80);

        let date_str = format!(
            "{:02}.{:02}.{:02}",
            self.start.day(),
            self.start.month(),
            self.start.year() % 100
        );
        push_field(&mut out, &date_str, 8);
        let time_str = format!(
            "{:02}.{:02}.{:02}",
            self.start.hour(),
            self.start.minute(),
            self.start.second()
        );
        push_field(&mut out, &time_str, 8);

        push_field(&mut out, &header_size.to_string(), 8);
        push_field(&mut out, if is_bdf { "BDF+C" } else { "EDF+C" }, 44);
        let record_count = if self.live {
            "-1".to_string()
        } else {
            self.records.len().to_string()
        };
        push_field(&mut out, &record_count, 8);
        push_field(&mut out, &format_edf_time(self.record_duration), 8);
        push_field(&mut out, &total_signals.to_string(), 4);

        // 信号头部：按列写入
        let annotation_label = if is_bdf { BDF_ANNOTATION_LABEL } else { ANNOTATION_LABEL };
        let column = |out: &mut Vec<u8>, len: usize, value: &dyn Fn(&SignalSpec) -> String, annotation: &str| {
            for spec in &self.signals {
                push_field(out, &value(spec), len);
            }
            push_field(out, annotation, len);
        };

        column(&mut out, 16, &|s| s.label.clone(), annotation_label);
        column(&mut out, 80, &|s| s.transducer.clone(), "");
        column(&mut out, 8, &|s| s.physical_unit.clone(), "");
        column(&mut out, 8, &|s| number_field(s.physical_min), "-1");
        column(&mut out, 8, &|s| number_field(s.physical_max), "1");
        column(&mut out, 8, &|s| s.digital_min.to_string(), &width_min.to_string());
        column(&mut out, 8, &|s| s.digital_max.to_string(), &width_max.to_string());
        column(&mut out, 80, &|s| s.prefilter.clone(), "");
        column(&mut out, 8, &|s| s.samples_per_record.to_string(), &annotation_samples.to_string());
        column(&mut out, 32, &|_| String::new(), "");

        debug_assert_eq!(out.len(), header_size);

        for (index, record) in self.records.iter().enumerate() {
            for samples in record {
                for &value in samples {
                    push_sample(&mut out, value, width);
                }
            }
            let tal = self.record_tal(index, annotation_block)?;
            out.extend_from_slice(&tal);
        }

        Ok(out)
    }

    /// 生成一个数据记录的TAL数据
    fn record_tal(&self, record_index: usize, block_size: usize) -> Result<Vec<u8>> {
        let record_start = record_index as i64 * self.record_duration;
        let record_end = record_start + self.record_duration;

        // 时间戳注释: "+<onset>\x14\x14\x00"
        let mut tal = Vec::with_capacity(block_size);
        tal.push(b'+');
        tal.extend_from_slice(format_edf_time(record_start).as_bytes());
        tal.extend_from_slice(&[FIELD_END, FIELD_END, RECORD_END]);

        for annotation in &self.annotations {
            if annotation.onset < record_start || annotation.onset >= record_end {
                continue;
            }

            if annotation.onset >= 0 {
                tal.push(b'+');
            }
            tal.extend_from_slice(format_edf_time(annotation.onset).as_bytes());
            if let Some(duration) = annotation.duration {
                tal.push(DURATION_MARK);
                tal.extend_from_slice(format_edf_time(duration).as_bytes());
            }
            tal.push(FIELD_END);
            for note in &annotation.notes {
                tal.extend_from_slice(note.as_bytes());
                tal.push(FIELD_END);
            }
            tal.push(RECORD_END);
        }

        // 至少保留一个额外的0作为块结束
        if tal.len() >= block_size {
            return Err(EdfError::InvalidFormat(format!(
                "Annotations of record {} need {} bytes, block holds {}",
                record_index,
                tal.len() + 1,
                block_size
            )));
        }

        tal.resize(block_size, RECORD_END);
        Ok(tal)
    }
}

fn subfield(value: &str) -> String {
    let value = to_ascii(value.trim()).replace(' ', "_");
    if value.is_empty() {
        "X".to_string()
    } else {
        value
    }
}

/// Left-aligned, space-padded ASCII field, truncated to `len`
fn push_field(out: &mut Vec<u8>, value: &str, len: usize) {
    let ascii = to_ascii(value);
    let bytes = ascii.as_bytes();
    let used = bytes.len().min(len);
    out.extend_from_slice(&bytes[..used]);
    out.resize(out.len() + (len - used), b' ');
}

fn number_field(value: f64) -> String {
    let text = value.to_string();
    if text.len() <= 8 {
        text
    } else {
        let trimmed = format!("{:.3}", value);
        trimmed.chars().take(8).collect()
    }
}

fn push_sample(out: &mut Vec<u8>, value: i32, width: SampleWidth) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..width.bytes()]);
}
