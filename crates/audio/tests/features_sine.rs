//! Integration tests: log-mel features on a generated sine wave.

use audio::FeatureExtractor;
use candle_core::Device;
use rnnt_core::SpeechConfig;

/// One second of a 440 Hz sine at 16 kHz.
fn sine_440hz() -> Vec<f32> {
    (0..16_000)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.5)
        .collect()
}

#[test]
fn test_sine_feature_shape() {
    let config = SpeechConfig::default();
    let extractor = FeatureExtractor::new(&config);
    let device = Device::Cpu;

    let features = extractor.extract(&sine_440hz(), &device).unwrap();

    assert_eq!(features.num_bins, 80);
    assert_eq!(features.num_frames, extractor.num_frames(16_000));
    assert_eq!(
        features.tensor.dims(),
        &[features.num_frames, features.num_bins]
    );
}

#[test]
fn test_sine_features_normalized() {
    let config = SpeechConfig::default();
    let extractor = FeatureExtractor::new(&config);
    let device = Device::Cpu;

    let features = extractor.extract(&sine_440hz(), &device).unwrap();
    let values: Vec<f32> = features.tensor.flatten_all().unwrap().to_vec1().unwrap();

    assert!(values.iter().all(|v| v.is_finite()));

    // Per-feature z-norm: global mean close to zero
    let mean: f32 = values.iter().sum::<f32>() / values.len() as f32;
    assert!(mean.abs() < 0.1, "mean={mean}");
}

#[test]
fn test_empty_signal_yields_no_frames() {
    let config = SpeechConfig::default();
    let extractor = FeatureExtractor::new(&config);
    let device = Device::Cpu;

    let features = extractor.extract(&[0.0; 100], &device).unwrap();
    assert_eq!(features.num_frames, 0);
}
