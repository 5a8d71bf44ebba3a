use edfstream::doctest_utils::{multi_channel_recording_bytes, simple_recording_bytes};
use edfstream::{
    decode, decode_header, decode_with, DecodeOptions, EdfEncoder, EdfError, SampleWidth, SignalSpec,
    TIME_DIMENSION,
};

// 创建测试信号的辅助函数
fn create_linear_signal(label: &str, samples_per_record: usize) -> SignalSpec {
    SignalSpec {
        label: label.to_string(),
        transducer: "Test Sensor".to_string(),
        physical_unit: "uV".to_string(),
        physical_min: -100.0,
        physical_max: 100.0,
        digital_min: -1000,
        digital_max: 1000,
        prefilter: "None".to_string(),
        samples_per_record,
    }
}

#[test]
fn test_complete_buffer_decodes() {
    let bytes = simple_recording_bytes().unwrap();
    let decoded = decode(&bytes).unwrap();

    let header = &decoded.header;
    assert_eq!(header.format_version, "0");
    assert!(header.is_plus());
    assert!(!header.is_discontinuous());
    assert_eq!(header.record_count, 2);
    assert_eq!(header.signal_count, 2);
    assert_eq!(header.sample_period, TIME_DIMENSION);
    assert_eq!(header.header_byte_size, 3 * 256);
    assert_eq!(header.duration_seconds(), 2.0);

    let patient = header.patient();
    assert_eq!(patient.code, "DOC001");
    assert_eq!(patient.name, "Test_Patient");

    assert_eq!(decoded.definitions.len(), 1);
    assert_eq!(decoded.annotation_channels().len(), 1);

    let eeg = &decoded.definitions[0];
    assert_eq!(eeg.label, "EEG Fp1");
    assert_eq!(eeg.physical_unit, "uV");
    assert_eq!(eeg.transducer_info, "AgAgCl cup electrodes");
    assert_eq!(eeg.samples_per_record, 256);
    assert!((eeg.sampling_rate() - 256.0).abs() < 1e-9);
}

#[test]
fn test_truncated_mid_field() {
    let bytes = simple_recording_bytes().unwrap();

    // 截断在记录字段中间
    let err = decode(&bytes[..100]).unwrap_err();
    assert!(matches!(err, EdfError::TruncatedInput { field: "recording_id", .. }));

    // 截断在信号标签列中间
    let err = decode(&bytes[..256 + 20]).unwrap_err();
    assert!(matches!(err, EdfError::TruncatedInput { field: "label", .. }));

    // 截断在数据记录中
    let err = decode(&bytes[..bytes.len() - 10]).unwrap_err();
    match err {
        EdfError::TruncatedInput { field, needed, available } => {
            assert_eq!(field, "data_record");
            assert!(available < needed);
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert!(decode(&[]).unwrap_err().is_decode_error());
}

#[test]
fn test_column_major_labels_follow_permutation() {
    let original = ["EEG C3", "EEG Cz", "EEG C4"];
    let permuted = ["EEG C4", "EEG C3", "EEG Cz"];

    for labels in [original, permuted] {
        let decoded = decode(&multi_channel_recording_bytes(&labels).unwrap()).unwrap();
        assert_eq!(decoded.definitions.len(), 3);

        for (index, def) in decoded.definitions.iter().enumerate() {
            assert_eq!(def.id, index);
            assert_eq!(def.label, labels[index]);
            // 其余字段不应串列
            assert_eq!(def.physical_unit, "uV");
            assert_eq!(def.pre_filter_info, "HP:0.1Hz LP:70Hz");
            assert_eq!(def.samples_per_record, 256);

            // 第 i 个通道的正弦幅值为 10 * (i + 1)
            let peak = decoded.segment.signals[index]
                .values
                .iter()
                .cloned()
                .fold(f64::MIN, f64::max);
            let amplitude = 10.0 * (index + 1) as f64;
            assert!((peak - amplitude).abs() < 0.1 * amplitude, "peak {} for {}", peak, def.label);
        }
    }
}

#[test]
fn test_scale_maps_digital_to_physical() {
    let mut encoder = EdfEncoder::new();
    encoder.add_signal(create_linear_signal("Linear", 5)).unwrap();
    let digital = vec![-1000, -500, 0, 250, 1000];
    encoder.write_digital_record(&[digital.clone()]).unwrap();

    let decoded = decode(&encoder.encode().unwrap()).unwrap();
    let def = &decoded.definitions[0];
    assert!((def.scale - 0.1).abs() < 1e-12);

    for (value, d) in decoded.segment.signals[0].values.iter().zip(&digital) {
        assert!((value - *d as f64 * def.scale).abs() < 1e-9);
    }
}

#[test]
fn test_out_of_range_digital_values_are_clamped() {
    let mut encoder = EdfEncoder::new();
    encoder.add_signal(create_linear_signal("Clamp", 2)).unwrap();
    encoder.write_digital_record(&[vec![5000, -5000]]).unwrap();

    let decoded = decode(&encoder.encode().unwrap()).unwrap();
    let values = &decoded.segment.signals[0].values;
    assert!((values[0] - 100.0).abs() < 1e-9);
    assert!((values[1] + 100.0).abs() < 1e-9);
}

#[test]
fn test_sample_time_points() {
    let bytes = simple_recording_bytes().unwrap();
    let decoded = decode(&bytes).unwrap();
    let start = decoded.header.time_range.start;
    let samples = &decoded.segment.signals[0];

    assert_eq!(samples.time_points[0], start);
    assert_eq!(samples.time_points[1], start + (TIME_DIMENSION as f64 / 256.0).round() as i64);
    assert_eq!(samples.time_points[256], start + TIME_DIMENSION);
    assert!(samples.time_points.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(decoded.segment.time_range, decoded.header.time_range);
}

#[test]
fn test_bdf_24bit_samples() {
    let mut encoder = EdfEncoder::new();
    encoder.set_sample_width(SampleWidth::Bits24);
    encoder
        .add_signal(SignalSpec {
            label: "Wide".to_string(),
            transducer: String::new(),
            physical_unit: "nV".to_string(),
            physical_min: -8388608.0,
            physical_max: 8388607.0,
            digital_min: -8388608,
            digital_max: 8388607,
            prefilter: String::new(),
            samples_per_record: 6,
        })
        .unwrap();
    let digital = vec![-8388608, -1, 0, 1, 8388607, 123456];
    encoder.write_digital_record(&[digital.clone()]).unwrap();

    let bytes = encoder.encode().unwrap();
    assert_eq!(bytes[0], 0xFF);
    assert_eq!(&bytes[1..8], b"BIOSEMI");

    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded.header.sample_width, SampleWidth::Bits24);
    assert_eq!(decoded.header.format_version, "BIOSEMI");
    assert_eq!(decoded.annotation_channels()[0].label, "BDF Annotations");

    let values: Vec<i64> = decoded.segment.signals[0]
        .values
        .iter()
        .map(|v| v.round() as i64)
        .collect();
    let expected: Vec<i64> = digital.iter().map(|&d| d as i64).collect();
    assert_eq!(values, expected);
}

#[test]
fn test_forced_sample_width() {
    let bytes = simple_recording_bytes().unwrap();
    let forced = decode_with(
        &bytes,
        DecodeOptions {
            sample_width: Some(SampleWidth::Bits16),
        },
    )
    .unwrap();
    assert_eq!(forced, decode(&bytes).unwrap());
}

#[test]
fn test_live_record_count_resolved_from_length() {
    let mut encoder = EdfEncoder::new();
    encoder.set_live(true);
    encoder.add_signal(create_linear_signal("Live", 10)).unwrap();
    for _ in 0..3 {
        encoder.write_physical_record(&[vec![1.0; 10]]).unwrap();
    }

    let mut bytes = encoder.encode().unwrap();
    // 录制中的文件尾部可能有不完整的记录
    bytes.extend_from_slice(&[0u8; 7]);

    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded.header.record_count, 3);
    assert_eq!(decoded.segment.signals[0].len(), 30);
    assert_eq!(decoded.header.time_range.duration(), 3 * TIME_DIMENSION);

    let (header, definitions) = decode_header(&bytes[..decoded.header.header_byte_size]).unwrap();
    assert_eq!(header.record_count, 0);
    assert_eq!(definitions.len(), 1);
}

#[test]
fn test_malformed_fields() {
    let bytes = simple_recording_bytes().unwrap();

    let mut bad_count = bytes.clone();
    bad_count[252..256].copy_from_slice(b"ab  ");
    assert!(matches!(
        decode(&bad_count).unwrap_err(),
        EdfError::MalformedField { field: "signal_count", .. }
    ));

    let mut bad_date = bytes.clone();
    bad_date[168..176].copy_from_slice(b"32.13.85");
    assert!(matches!(decode(&bad_date).unwrap_err(), EdfError::MalformedField { .. }));

    let mut zero_signals = bytes;
    zero_signals[252..256].copy_from_slice(b"0   ");
    assert!(decode(&zero_signals).unwrap_err().is_decode_error());
}

#[test]
fn test_record_count_beyond_buffer() {
    let mut bytes = simple_recording_bytes().unwrap();
    bytes[236..244].copy_from_slice(b"99999999");

    // 声明的记录数远超缓冲区时在分配之前报错
    match decode(&bytes).unwrap_err() {
        EdfError::TruncatedInput { field, needed, available } => {
            assert_eq!(field, "data_record");
            assert!(needed > available);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_time_range_overflow() {
    let mut bytes = simple_recording_bytes().unwrap();
    bytes[236..244].copy_from_slice(b"99999999");
    bytes[244..252].copy_from_slice(b"99999999");

    assert!(matches!(
        decode(&bytes).unwrap_err(),
        EdfError::MalformedField { field: "record_count", .. }
    ));
    assert!(decode_header(&bytes).is_err());
}
