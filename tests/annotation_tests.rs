use edfstream::{decode, parse_annotation_block, EdfEncoder, EdfError, SignalSpec, TIME_DIMENSION};

// 创建测试信号的辅助函数
fn create_test_signal() -> SignalSpec {
    SignalSpec {
        label: "EEG Test".to_string(),
        transducer: "AgAgCl electrodes".to_string(),
        physical_unit: "uV".to_string(),
        physical_min: -100.0,
        physical_max: 100.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: "HP:0.1Hz".to_string(),
        samples_per_record: 64,
    }
}

fn write_seconds(encoder: &mut EdfEncoder, seconds: usize) {
    for _ in 0..seconds {
        encoder.write_physical_record(&[vec![0.0; 64]]).unwrap();
    }
}

#[test]
fn test_punctual_and_block_annotations() {
    let block = b"+0\x14\x14\x00+1.5\x14Spike\x14\x00+3\x1530\x14Stage N2\x14Movement\x14\x00\x00";
    let start = 1_000 * TIME_DIMENSION;
    let parsed = parse_annotation_block(block, start).unwrap();

    assert_eq!(parsed.record_onset, Some(0));
    assert_eq!(parsed.annotations.len(), 2);

    let spike = &parsed.annotations[0];
    assert!(spike.is_punctual());
    assert_eq!(spike.time_range.start, start + 15 * TIME_DIMENSION / 10);
    assert_eq!(spike.notes, vec!["Spike"]);

    let stage = &parsed.annotations[1];
    assert_eq!(stage.time_range.start, start + 3 * TIME_DIMENSION);
    assert_eq!(stage.time_range.duration(), 30 * TIME_DIMENSION);
    // 注释顺序必须保持
    assert_eq!(stage.notes, vec!["Stage N2", "Movement"]);
}

#[test]
fn test_basic_annotation_encode_decode() {
    let mut encoder = EdfEncoder::new();
    encoder.add_signal(create_test_signal()).unwrap();

    encoder.add_annotation(0.0, None, &["Recording start"]).unwrap();
    encoder.add_annotation(1.5, Some(2.0), &["Eyes closed"]).unwrap();
    encoder.add_annotation(4.25, None, &["Blink", "Left eye"]).unwrap();
    write_seconds(&mut encoder, 5);

    let decoded = decode(&encoder.encode().unwrap()).unwrap();
    let start = decoded.header.time_range.start;
    let annotations = &decoded.segment.annotations;
    assert_eq!(annotations.len(), 3);

    assert_eq!(annotations[0].notes, vec!["Recording start"]);
    assert_eq!(annotations[0].time_range.start, start);

    assert_eq!(annotations[1].time_range.start, start + 15 * TIME_DIMENSION / 10);
    assert_eq!(annotations[1].time_range.end, start + 35 * TIME_DIMENSION / 10);

    assert_eq!(annotations[2].notes, vec!["Blink", "Left eye"]);
    assert_eq!(annotations[2].time_range.start, start + 425 * TIME_DIMENSION / 100);
    assert!(annotations[2].is_punctual());
}

#[test]
fn test_annotation_time_precision() {
    let mut encoder = EdfEncoder::new();
    encoder.add_signal(create_test_signal()).unwrap();
    encoder.add_annotation(0.0001, None, &["Sub-millisecond"]).unwrap();
    encoder.add_annotation(1.9999999, None, &["Almost two"]).unwrap();
    write_seconds(&mut encoder, 2);

    let decoded = decode(&encoder.encode().unwrap()).unwrap();
    let start = decoded.header.time_range.start;
    let onsets: Vec<i64> = decoded
        .segment
        .annotations
        .iter()
        .map(|a| a.time_range.start - start)
        .collect();
    assert_eq!(onsets, vec![1_000, 19_999_999]);
}

#[test]
fn test_annotations_outside_written_records_are_lost() {
    let mut encoder = EdfEncoder::new();
    encoder.add_signal(create_test_signal()).unwrap();
    encoder.add_annotation(2.5, None, &["Valid event"]).unwrap();
    encoder.add_annotation(4.999, None, &["Last moment"]).unwrap();
    encoder.add_annotation(5.0, None, &["Will be discarded"]).unwrap();
    write_seconds(&mut encoder, 5);

    let decoded = decode(&encoder.encode().unwrap()).unwrap();
    let notes: Vec<&str> = decoded
        .segment
        .annotations
        .iter()
        .map(|a| a.notes[0].as_str())
        .collect();
    assert_eq!(notes, vec!["Valid event", "Last moment"]);
}

#[test]
fn test_annotation_validation() {
    let mut encoder = EdfEncoder::new();
    encoder.add_signal(create_test_signal()).unwrap();

    assert!(matches!(
        encoder.add_annotation(1.0, None, &[]),
        Err(EdfError::InvalidFormat(_))
    ));
    assert!(encoder.add_annotation(1.0, Some(-1.0), &["Negative"]).is_err());

    // 注释块放不下时编码失败
    encoder.set_annotation_bytes(16).unwrap();
    encoder
        .add_annotation(0.5, None, &["A note that will never fit in sixteen bytes"])
        .unwrap();
    write_seconds(&mut encoder, 1);
    assert!(encoder.encode().is_err());
}

#[test]
fn test_sleep_study_annotations() {
    let mut encoder = EdfEncoder::new();
    encoder.set_record_duration(30.0).unwrap();
    encoder
        .add_signal(SignalSpec {
            samples_per_record: 30,
            ..create_test_signal()
        })
        .unwrap();

    let stages = ["Sleep stage W", "Sleep stage N1", "Sleep stage N2", "Sleep stage N3", "Sleep stage R"];
    for (epoch, stage) in stages.iter().enumerate() {
        encoder
            .add_annotation(epoch as f64 * 30.0, Some(30.0), &[stage])
            .unwrap();
    }
    encoder.add_annotation(75.0, None, &["Arousal"]).unwrap();
    for _ in 0..stages.len() {
        encoder.write_physical_record(&[vec![0.0; 30]]).unwrap();
    }

    let decoded = decode(&encoder.encode().unwrap()).unwrap();
    assert_eq!(decoded.header.sample_period, 30 * TIME_DIMENSION);

    let annotations = &decoded.segment.annotations;
    assert_eq!(annotations.len(), 6);

    let epochs: Vec<_> = annotations.iter().filter(|a| !a.is_punctual()).collect();
    assert_eq!(epochs.len(), 5);
    for (epoch, annotation) in epochs.iter().enumerate() {
        assert_eq!(annotation.notes, vec![stages[epoch]]);
        assert_eq!(annotation.time_range.duration(), 30 * TIME_DIMENSION);
    }

    let arousal = annotations.iter().find(|a| a.notes[0] == "Arousal").unwrap();
    assert_eq!(
        arousal.time_range.start - decoded.header.time_range.start,
        75 * TIME_DIMENSION
    );
}
