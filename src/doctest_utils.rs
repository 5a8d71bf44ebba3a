// Internal utilities for documentation tests
// This file contains helper functions that build in-memory recordings for doctests

use chrono::NaiveDateTime;

use crate::{EdfEncoder, Result, SignalSpec};

fn eeg_spec(label: &str) -> SignalSpec {
    SignalSpec {
        label: label.to_string(),
        transducer: "AgAgCl cup electrodes".to_string(),
        physical_unit: "uV".to_string(),
        physical_min: -200.0,
        physical_max: 200.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: "HP:0.1Hz LP:70Hz".to_string(),
        samples_per_record: 256,
    }
}

/// 10Hz sine wave, one record of 256 samples
fn sine_record(amplitude: f64) -> Vec<f64> {
    (0..256)
        .map(|i| {
            let t = i as f64 / 256.0;
            amplitude * (2.0 * std::f64::consts::PI * 10.0 * t).sin()
        })
        .collect()
}

/// Two one-second records of "EEG Fp1" with an "Eyes closed" annotation at 0.5s
pub fn simple_recording_bytes() -> Result<Vec<u8>> {
    let mut encoder = EdfEncoder::new();
    encoder.set_patient_info("DOC001", "M", "01-JAN-1990", "Test Patient");
    encoder.add_signal(eeg_spec("EEG Fp1"))?;
    encoder.add_annotation(0.5, None, &["Eyes closed"])?;

    for _ in 0..2 {
        encoder.write_physical_record(&[sine_record(50.0)])?;
    }
    encoder.encode()
}

/// `records` one-second records of "EEG Fp1" starting at `start`
pub fn recording_bytes_at(start: NaiveDateTime, records: usize) -> Result<Vec<u8>> {
    let mut encoder = EdfEncoder::new();
    encoder.set_start(start);
    encoder.add_signal(eeg_spec("EEG Fp1"))?;

    for _ in 0..records {
        encoder.write_physical_record(&[sine_record(50.0)])?;
    }
    encoder.encode()
}

/// One record with one signal per label, each a sine of a different amplitude
pub fn multi_channel_recording_bytes(labels: &[&str]) -> Result<Vec<u8>> {
    let mut encoder = EdfEncoder::new();
    encoder.set_patient_info("DOC002", "F", "15-MAR-1985", "Multi Channel Test");
    for label in labels {
        encoder.add_signal(eeg_spec(label))?;
    }

    let record: Vec<Vec<f64>> = (0..labels.len())
        .map(|i| sine_record(10.0 * (i + 1) as f64))
        .collect();
    encoder.write_physical_record(&record)?;
    encoder.encode()
}
