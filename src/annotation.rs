//! Parser for the annotation channel blocks of EDF+/BDF+ data records.
//!
//! Each block holds Time-stamped Annotations Lists (TALs):
//!
//! ```text
//! +<onset>[\x15<duration>]\x14[<note>\x14]*\x00
//! ```
//!
//! A block ends at two consecutive `\x00` bytes; the rest is padding.

use crate::error::{EdfError, Result};
use crate::types::{Annotation, TimeRange};
use crate::utils::parse_edf_time;

/// Ends the onset, the duration or one note
pub const FIELD_END: u8 = 0x14;
/// Separates the onset from a duration
pub const DURATION_MARK: u8 = 0x15;
/// Ends one TAL; two in a row end the block
pub const RECORD_END: u8 = 0x00;

/// Result of parsing one annotation block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationBlock {
    /// Onset of the leading note-less TAL, relative to the segment start
    pub record_onset: Option<i64>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TalState {
    Onset,
    Duration,
    Notes,
    Done,
}

struct TalParser {
    segment_start: i64,
    state: TalState,
    field: Vec<u8>,
    onset: Option<i64>,
    duration: Option<i64>,
    notes: Vec<String>,
    tal_index: usize,
    out: AnnotationBlock,
}

impl TalParser {
    fn new(segment_start: i64) -> Self {
        TalParser {
            segment_start,
            state: TalState::Onset,
            field: Vec::new(),
            onset: None,
            duration: None,
            notes: Vec::new(),
            tal_index: 0,
            out: AnnotationBlock::default(),
        }
    }

    fn run(mut self, block: &[u8]) -> Result<AnnotationBlock> {
        let mut previous_was_end = false;

        for &byte in block {
            if byte == RECORD_END {
                if previous_was_end {
                    self.state = TalState::Done;
                    break;
                }
                self.finish_tal()?;
                previous_was_end = true;
                continue;
            }
            previous_was_end = false;

            match (self.state, byte) {
                (TalState::Onset, FIELD_END) => {
                    // 空字段视为填充
                    if !self.field.is_empty() {
                        self.onset = Some(self.take_time("annotation_onset")?);
                        self.state = TalState::Notes;
                    }
                }
                (TalState::Onset, DURATION_MARK) => {
                    self.onset = Some(self.take_time("annotation_onset")?);
                    self.state = TalState::Duration;
                }
                (TalState::Duration, FIELD_END) => {
                    if !self.field.is_empty() {
                        self.duration = Some(self.take_time("annotation_duration")?);
                    }
                    self.state = TalState::Notes;
                }
                (TalState::Duration, DURATION_MARK) => {
                    return Err(EdfError::malformed(
                        "annotation_duration",
                        String::from_utf8_lossy(&self.field).into_owned(),
                    ));
                }
                (TalState::Notes, FIELD_END) => {
                    if !self.field.is_empty() {
                        let note = String::from_utf8_lossy(&self.field).into_owned();
                        self.notes.push(note);
                        self.field.clear();
                    }
                }
                (TalState::Done, _) => break,
                (_, other) => self.field.push(other),
            }
        }

        if self.state != TalState::Done {
            // 块末尾缺少终止符：保留已完整读取的注释
            if self.state == TalState::Notes && !self.field.is_empty() {
                let note = String::from_utf8_lossy(&self.field).into_owned();
                self.notes.push(note);
                self.field.clear();
            }
            self.finish_tal()?;
        }

        Ok(self.out)
    }

    fn take_time(&mut self, field: &'static str) -> Result<i64> {
        let text = String::from_utf8_lossy(&self.field).into_owned();
        self.field.clear();
        parse_edf_time(field, &text)
    }

    fn finish_tal(&mut self) -> Result<()> {
        if self.state == TalState::Onset && !self.field.is_empty() {
            // TAL with an onset and nothing else
            self.onset = Some(self.take_time("annotation_onset")?);
        }

        let onset = self.onset.take();
        let duration = self.duration.take();
        let notes = std::mem::take(&mut self.notes);
        self.field.clear();
        self.state = TalState::Onset;

        let Some(onset) = onset else {
            return Ok(());
        };

        if notes.is_empty() {
            if self.tal_index == 0 {
                self.out.record_onset = Some(onset);
            }
        } else {
            let start = self
                .segment_start
                .checked_add(onset)
                .ok_or_else(|| EdfError::malformed("annotation_onset", onset.to_string()))?;
            let duration = duration.unwrap_or(0).max(0);
            let end = start
                .checked_add(duration)
                .ok_or_else(|| EdfError::malformed("annotation_duration", duration.to_string()))?;
            self.out.annotations.push(Annotation {
                time_range: TimeRange::new(start, end),
                notes,
            });
        }

        self.tal_index += 1;
        Ok(())
    }
}

/// Parses one annotation-channel block.
///
/// Onsets are relative to `segment_start` (absolute 100ns ticks). TALs
/// without notes yield no annotation; the first one of a block marks the
/// record onset.
///
/// # Examples
///
/// ```rust
/// use edfstream::annotation::parse_annotation_block;
///
/// let block = b"+0\x14\x14\x00+1.5\x152\x14Sleep N1\x14Arousal\x14\x00\x00\x00";
/// let parsed = parse_annotation_block(block, 0)?;
///
/// assert_eq!(parsed.record_onset, Some(0));
/// assert_eq!(parsed.annotations.len(), 1);
/// assert_eq!(parsed.annotations[0].notes, vec!["Sleep N1", "Arousal"]);
/// assert_eq!(parsed.annotations[0].time_range.duration(), 20_000_000);
/// # Ok::<(), edfstream::EdfError>(())
/// ```
pub fn parse_annotation_block(block: &[u8], segment_start: i64) -> Result<AnnotationBlock> {
    TalParser::new(segment_start).run(block)
}
