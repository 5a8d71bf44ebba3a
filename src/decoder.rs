use crate::annotation::parse_annotation_block;
use crate::error::{EdfError, Result};
use crate::types::{Header, SampleWidth, Segment, SignalDefinition, SignalSamples, TimeRange, ValueRange};
use crate::utils::{
    datetime_to_ticks, parse_edf_time, parse_float_field, parse_int_field, parse_start_datetime, text_field,
};
use crate::{ANNOTATION_LABEL, BDF_ANNOTATION_LABEL, MAX_SIGNALS};

/// Size of the fixed part of the header and of each per-signal header slot
const HEADER_BLOCK: usize = 256;

/// Overrides for [`decode_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Forces a sample width instead of detecting it from the version field
    pub sample_width: Option<SampleWidth>,
}

/// Everything decoded from one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub header: Header,
    /// Signal channels, annotation channels excluded
    pub definitions: Vec<SignalDefinition>,
    pub segment: Segment,
    annotation_channels: Vec<SignalDefinition>,
}

impl Decoded {
    pub fn annotation_channels(&self) -> &[SignalDefinition] {
        &self.annotation_channels
    }
}

/// Reads fixed-width fields front to back, failing on short input
struct FieldCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        FieldCursor { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(EdfError::TruncatedInput {
                field,
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn text(&mut self, len: usize, field: &'static str) -> Result<String> {
        self.take(len, field).map(text_field)
    }

    fn int(&mut self, len: usize, field: &'static str) -> Result<i64> {
        let raw = self.take(len, field)?;
        parse_int_field(field, raw)
    }

    /// Reads `count` consecutive fields of one column
    fn column(&mut self, count: usize, len: usize, field: &'static str) -> Result<Vec<&'a [u8]>> {
        (0..count).map(|_| self.take(len, field)).collect()
    }

    fn skip_to(&mut self, pos: usize, field: &'static str) -> Result<()> {
        if pos > self.buf.len() {
            return Err(EdfError::TruncatedInput {
                field,
                needed: pos - self.pos,
                available: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }
}

/// Decodes a complete EDF+/BDF+ buffer into header, definitions and one segment.
///
/// # Errors
///
/// * `EdfError::TruncatedInput` - fewer bytes remain than a field or record declares
/// * `EdfError::MalformedField` - a numeric text field does not parse, or a value is out of range
///
/// # Examples
///
/// ```rust
/// use edfstream::decode;
///
/// let bytes = edfstream::doctest_utils::simple_recording_bytes()?;
/// let decoded = decode(&bytes)?;
///
/// assert_eq!(decoded.definitions.len(), 1);
/// assert_eq!(decoded.definitions[0].label, "EEG Fp1");
/// assert_eq!(decoded.segment.signals[0].len(), 256 * 2);
/// assert_eq!(decoded.segment.annotations[0].notes, vec!["Eyes closed"]);
/// # Ok::<(), edfstream::EdfError>(())
/// ```
pub fn decode(buffer: &[u8]) -> Result<Decoded> {
    decode_with(buffer, DecodeOptions::default())
}

/// Like [`decode`], with explicit options
pub fn decode_with(buffer: &[u8], options: DecodeOptions) -> Result<Decoded> {
    let mut cursor = FieldCursor::new(buffer);
    let (header, channels) = parse_header(&mut cursor, options)?;

    let segment = decode_records(&mut cursor, &header, &channels)?;

    let (annotation_channels, definitions): (Vec<_>, Vec<_>) = channels
        .into_iter()
        .partition(|def| def.is_annotation_channel);

    Ok(Decoded {
        header,
        definitions,
        segment,
        annotation_channels,
    })
}

/// Decodes only the header and the signal definitions.
///
/// For a live recording (record count `-1`) the record count is resolved
/// from the buffer length.
pub fn decode_header(buffer: &[u8]) -> Result<(Header, Vec<SignalDefinition>)> {
    let mut cursor = FieldCursor::new(buffer);
    let (header, channels) = parse_header(&mut cursor, DecodeOptions::default())?;
    let definitions = channels
        .into_iter()
        .filter(|def| !def.is_annotation_channel)
        .collect();
    Ok((header, definitions))
}

/// 解析文件头部
fn parse_header(
    cursor: &mut FieldCursor<'_>,
    options: DecodeOptions,
) -> Result<(Header, Vec<SignalDefinition>)> {
    let version = cursor.take(8, "version")?;
    let is_bdf = version[0] == 0xFF;
    let format_version = if is_bdf {
        text_field(&version[1..])
    } else {
        parse_int_field("version", version)?;
        text_field(version)
    };
    let sample_width = options.sample_width.unwrap_or(if is_bdf {
        SampleWidth::Bits24
    } else {
        SampleWidth::Bits16
    });

    let patient_id = cursor.text(80, "patient_id")?;
    let description = cursor.text(80, "recording_id")?;

    // 解析日期和时间
    let date_raw = cursor.text(8, "start_date")?;
    let time_raw = cursor.text(8, "start_time")?;
    let start_datetime = parse_start_datetime(&date_raw, &time_raw)?;

    let header_byte_size = cursor.int(8, "header_byte_size")?;
    let reserved = cursor.text(44, "reserved")?;
    let declared_records = cursor.int(8, "record_count")?;
    let duration_raw = cursor.text(8, "record_duration")?;
    let sample_period = parse_edf_time("record_duration", &duration_raw)?;
    let signal_count = cursor.int(4, "signal_count")?;

    if signal_count < 1 || signal_count > MAX_SIGNALS as i64 {
        return Err(EdfError::malformed("signal_count", signal_count.to_string()));
    }
    let signal_count = signal_count as usize;

    let expected_header_size = (signal_count + 1) * HEADER_BLOCK;
    if header_byte_size < expected_header_size as i64 {
        return Err(EdfError::malformed("header_byte_size", header_byte_size.to_string()));
    }
    if sample_period < 0 {
        return Err(EdfError::malformed("record_duration", duration_raw));
    }
    if declared_records < -1 {
        return Err(EdfError::malformed("record_count", declared_records.to_string()));
    }

    let channels = parse_signals(cursor, signal_count, sample_period, sample_width)?;
    let header_byte_size = header_byte_size as usize;
    cursor.skip_to(header_byte_size, "header")?;

    let record_size = record_size(&channels)?;
    let record_count = if declared_records == -1 {
        // 仍在录制中：按缓冲区长度计算完整记录数
        if record_size == 0 {
            0
        } else {
            (cursor.remaining() / record_size) as i64
        }
    } else {
        declared_records
    };

    let start = datetime_to_ticks(&start_datetime);
    let end = sample_period
        .checked_mul(record_count)
        .and_then(|span| start.checked_add(span))
        .ok_or_else(|| EdfError::malformed("record_count", record_count.to_string()))?;
    let header = Header {
        format_version,
        patient_id,
        description,
        start_datetime,
        time_range: TimeRange::new(start, end),
        header_byte_size,
        reserved,
        sample_period,
        record_count,
        signal_count,
        sample_width,
    };

    Ok((header, channels))
}

/// Bytes of one data record; a sum that does not fit is malformed
fn record_size(channels: &[SignalDefinition]) -> Result<usize> {
    channels.iter().try_fold(0usize, |total, def| {
        def.samples_per_record
            .checked_mul(def.sample_width_bits as usize / 8)
            .and_then(|bytes| total.checked_add(bytes))
            .ok_or_else(|| EdfError::malformed("samples_per_record", def.samples_per_record.to_string()))
    })
}

/// 解析信号参数
///
/// Signal headers are column-major: all labels, then all transducers, and so
/// on. Each column is read in full before the next one starts.
fn parse_signals(
    cursor: &mut FieldCursor<'_>,
    count: usize,
    record_duration: i64,
    sample_width: SampleWidth,
) -> Result<Vec<SignalDefinition>> {
    let labels = cursor.column(count, 16, "label")?;
    let transducers = cursor.column(count, 80, "transducer")?;
    let units = cursor.column(count, 8, "physical_unit")?;
    let physical_mins = cursor.column(count, 8, "physical_min")?;
    let physical_maxs = cursor.column(count, 8, "physical_max")?;
    let digital_mins = cursor.column(count, 8, "digital_min")?;
    let digital_maxs = cursor.column(count, 8, "digital_max")?;
    let prefilters = cursor.column(count, 80, "prefilter")?;
    let samples = cursor.column(count, 8, "samples_per_record")?;
    cursor.column(count, 32, "signal_reserved")?;

    let (width_min, width_max) = sample_width.digital_limits();
    let mut definitions = Vec::with_capacity(count);

    for id in 0..count {
        let label = text_field(labels[id]);
        let is_annotation_channel =
            label.starts_with(ANNOTATION_LABEL) || label.starts_with(BDF_ANNOTATION_LABEL);

        let physical_min = parse_float_field("physical_min", physical_mins[id])?;
        let physical_max = parse_float_field("physical_max", physical_maxs[id])?;
        let digital_min = parse_int_field("digital_min", digital_mins[id])?;
        let digital_max = parse_int_field("digital_max", digital_maxs[id])?;
        let samples_per_record = parse_int_field("samples_per_record", samples[id])?;

        if samples_per_record < 0 {
            return Err(EdfError::malformed("samples_per_record", samples_per_record.to_string()));
        }

        // 注释通道的量程不参与换算
        if !is_annotation_channel {
            if physical_min == physical_max {
                return Err(EdfError::malformed(
                    "physical_range",
                    format!("{} .. {}", physical_min, physical_max),
                ));
            }
            if digital_min == digital_max
                || digital_min < width_min as i64
                || digital_max > width_max as i64
            {
                return Err(EdfError::malformed(
                    "digital_range",
                    format!("{} .. {}", digital_min, digital_max),
                ));
            }
        }

        let digital_range = ValueRange {
            min: digital_min.clamp(width_min as i64, width_max as i64) as i32,
            max: digital_max.clamp(width_min as i64, width_max as i64) as i32,
        };
        let scale = if digital_range.max != digital_range.min {
            (physical_max - physical_min) / (digital_range.max - digital_range.min) as f64
        } else {
            1.0
        };
        let sampling_period = if samples_per_record > 0 {
            record_duration as f64 / samples_per_record as f64
        } else {
            0.0
        };

        definitions.push(SignalDefinition {
            id,
            label,
            transducer_info: text_field(transducers[id]),
            physical_unit: text_field(units[id]),
            physical_range: ValueRange {
                min: physical_min,
                max: physical_max,
            },
            digital_range,
            pre_filter_info: text_field(prefilters[id]),
            samples_per_record: samples_per_record as usize,
            scale,
            sampling_period,
            is_annotation_channel,
            sample_width_bits: sample_width.bits(),
        });
    }

    Ok(definitions)
}

fn decode_records(
    cursor: &mut FieldCursor<'_>,
    header: &Header,
    channels: &[SignalDefinition],
) -> Result<Segment> {
    let width = header.sample_width;
    let segment_start = header.time_range.start;
    let record_size = record_size(channels)?;
    let record_count = header.record_count as usize;

    // 分配前先确认所有记录的字节都在缓冲区内
    let needed = record_size
        .checked_mul(record_count)
        .ok_or_else(|| EdfError::malformed("record_count", header.record_count.to_string()))?;
    if cursor.remaining() < needed {
        return Err(EdfError::TruncatedInput {
            field: "data_record",
            needed,
            available: cursor.remaining(),
        });
    }

    let mut signals: Vec<SignalSamples> = channels
        .iter()
        .filter(|def| !def.is_annotation_channel)
        .map(|def| {
            let mut samples = SignalSamples::new(def.id);
            let total = def.samples_per_record * record_count;
            samples.time_points.reserve(total);
            samples.values.reserve(total);
            samples
        })
        .collect();
    let mut annotations = Vec::new();

    // 零长度记录不含任何数据
    let records = if record_size == 0 { 0 } else { header.record_count };
    for record_index in 0..records {
        let record = cursor.take(record_size, "data_record")?;

        // Channel byte ranges inside the record
        let mut blocks = Vec::with_capacity(channels.len());
        let mut offset = 0;
        for def in channels {
            let len = def.record_bytes();
            blocks.push(&record[offset..offset + len]);
            offset += len;
        }

        // 注释通道优先，以便获得不连续文件的记录起始时间
        let mut record_onset = None;
        for (def, block) in channels.iter().zip(&blocks) {
            if def.is_annotation_channel {
                let parsed = parse_annotation_block(block, segment_start)?;
                if record_onset.is_none() {
                    record_onset = parsed.record_onset;
                }
                annotations.extend(parsed.annotations);
            }
        }

        let record_start = match record_onset {
            Some(onset) if header.is_discontinuous() => segment_start
                .checked_add(onset)
                .filter(|start| start.checked_add(header.sample_period).is_some())
                .ok_or_else(|| EdfError::malformed("annotation_onset", onset.to_string()))?,
            _ => segment_start + record_index * header.sample_period,
        };

        let mut signal_slot = 0;
        for (def, block) in channels.iter().zip(&blocks) {
            if def.is_annotation_channel {
                continue;
            }
            let out = &mut signals[signal_slot];
            signal_slot += 1;

            for (i, raw) in block.chunks_exact(width.bytes()).enumerate() {
                let digital = read_sample(raw, width)
                    .clamp(def.digital_range.min, def.digital_range.max);
                out.time_points
                    .push(record_start + (i as f64 * def.sampling_period).round() as i64);
                out.values.push(def.to_physical(digital));
            }
        }
    }

    Ok(Segment {
        time_range: header.time_range,
        signals,
        annotations,
    })
}

/// Little-endian signed sample; 24-bit is a 16-bit low word plus a signed high byte
fn read_sample(raw: &[u8], width: SampleWidth) -> i32 {
    match width {
        SampleWidth::Bits8 => raw[0] as i8 as i32,
        SampleWidth::Bits16 => i16::from_le_bytes([raw[0], raw[1]]) as i32,
        SampleWidth::Bits24 => {
            let low = u16::from_le_bytes([raw[0], raw[1]]) as i32;
            let high = raw[2] as i8 as i32;
            (high << 16) | low
        }
    }
}
