//! Log-mel спектрограмма для стримингового трансдьюсера.
//!
//! Пайплайн: преэмфазис → фреймирование (25мс/10мс, без паддинга по краям)
//! → окно Ханна → power-спектр FFT → Slaney mel-фильтры → ln с floor →
//! опциональная нормализация каждого признака по времени.
//!
//! Фреймы без центрирования: первый фрейм начинается с сэмпла 0, хвост
//! короче окна отбрасывается. Это позволяет стримингу кормить чанки
//! независимо, без переноса контекста окна между вызовами.

use candle_core::{Device, Tensor};
use rnnt_core::{FeatureTensor, RnntResult, SpeechConfig};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Экстрактор log-mel признаков.
#[derive(Debug)]
pub struct FeatureExtractor {
    config: SpeechConfig,
    window: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
}

impl FeatureExtractor {
    /// Создать экстрактор по конфигурации.
    pub fn new(config: &SpeechConfig) -> Self {
        let window = hann_window(config.frame_length());
        let mel_filters = create_slaney_mel_filterbank(
            config.num_feature_bins,
            config.n_fft(),
            config.sample_rate as f32,
            config.f_min,
            config.f_max,
        );
        Self {
            config: config.clone(),
            window,
            mel_filters,
        }
    }

    /// Количество признаков на фрейм.
    pub fn num_feature_bins(&self) -> usize {
        self.config.num_feature_bins
    }

    /// Сколько фреймов даст сигнал указанной длины.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        let frame_length = self.config.frame_length();
        let frame_step = self.config.frame_step();
        if num_samples < frame_length {
            0
        } else {
            (num_samples - frame_length) / frame_step + 1
        }
    }

    /// Извлечь признаки: сэмплы → тензор [time, num_feature_bins].
    pub fn extract(&self, samples: &[f32], device: &Device) -> RnntResult<FeatureTensor> {
        let emphasized = self.preemphasis(samples);
        let spectrogram = self.stft(&emphasized);
        let mut log_mel = self.apply_mel_filters(&spectrogram);

        if self.config.normalize_per_feature {
            normalize_per_feature(&mut log_mel, self.config.num_feature_bins);
        }

        let num_frames = log_mel.len();
        let num_bins = self.config.num_feature_bins;

        let flat: Vec<f32> = log_mel.into_iter().flatten().collect();
        let tensor = Tensor::from_vec(flat, (num_frames, num_bins), device)?;

        Ok(FeatureTensor::new(tensor, num_frames, num_bins))
    }

    /// Преэмфазис: s[i] - k * s[i-1].
    fn preemphasis(&self, samples: &[f32]) -> Vec<f32> {
        let k = self.config.preemphasis;
        if k == 0.0 || samples.is_empty() {
            return samples.to_vec();
        }
        let mut out = Vec::with_capacity(samples.len());
        out.push(samples[0]);
        for i in 1..samples.len() {
            out.push(samples[i] - k * samples[i - 1]);
        }
        out
    }

    /// STFT с power-спектром (magnitude^2), только положительные частоты.
    fn stft(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let frame_length = self.config.frame_length();
        let frame_step = self.config.frame_step();
        let n_fft = self.config.n_fft();
        let num_frames = self.num_frames(samples.len());

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        let mut spectrogram = Vec::with_capacity(num_frames);

        for frame_idx in 0..num_frames {
            let start = frame_idx * frame_step;

            // Окно + нулевой паддинг до n_fft
            let mut buffer: Vec<Complex<f32>> = (0..n_fft)
                .map(|i| {
                    let sample = if i < frame_length {
                        samples[start + i] * self.window[i]
                    } else {
                        0.0
                    };
                    Complex::new(sample, 0.0)
                })
                .collect();

            fft.process(&mut buffer);

            let power: Vec<f32> = buffer
                .iter()
                .take(n_fft / 2 + 1)
                .map(|c| c.re * c.re + c.im * c.im)
                .collect();

            spectrogram.push(power);
        }

        spectrogram
    }

    /// Mel-фильтры + натуральный логарифм с floor.
    fn apply_mel_filters(&self, spectrogram: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let floor = 1e-10_f32;
        spectrogram
            .iter()
            .map(|frame| {
                self.mel_filters
                    .iter()
                    .map(|filter| {
                        let energy: f32 = frame
                            .iter()
                            .zip(filter.iter())
                            .map(|(s, f)| s * f)
                            .sum();
                        energy.max(floor).ln()
                    })
                    .collect()
            })
            .collect()
    }
}

/// Нормализация каждого mel-бина по времени: (x - μ) / σ.
fn normalize_per_feature(log_mel: &mut [Vec<f32>], num_bins: usize) {
    let t = log_mel.len();
    if t == 0 {
        return;
    }
    for bin in 0..num_bins {
        let mean: f64 = log_mel.iter().map(|f| f[bin] as f64).sum::<f64>() / t as f64;
        let var: f64 = log_mel
            .iter()
            .map(|f| {
                let d = f[bin] as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / t as f64;
        let std = var.sqrt().max(1e-10);
        for frame in log_mel.iter_mut() {
            frame[bin] = ((frame[bin] as f64 - mean) / std) as f32;
        }
    }
}

/// Create Hann window (periodic for STFT).
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / length as f32).cos()))
        .collect()
}

/// Convert frequency to Slaney Mel scale.
/// Slaney uses linear below 1000 Hz, log above.
fn hz_to_mel_slaney(hz: f32) -> f32 {
    let f_min = 0.0;
    let f_sp = 200.0 / 3.0; // ~66.67 Hz
    let min_log_hz = 1000.0;
    let min_log_mel = (min_log_hz - f_min) / f_sp;
    let logstep = (6.4f32).ln() / 27.0;

    if hz >= min_log_hz {
        min_log_mel + ((hz / min_log_hz).ln() / logstep)
    } else {
        (hz - f_min) / f_sp
    }
}

/// Convert Slaney Mel scale to frequency.
fn mel_to_hz_slaney(mel: f32) -> f32 {
    let f_min = 0.0;
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = (min_log_hz - f_min) / f_sp;
    let logstep = (6.4f32).ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_min + f_sp * mel
    }
}

/// Create Slaney-normalized Mel filterbank.
fn create_slaney_mel_filterbank(
    n_mels: usize,
    n_fft: usize,
    sample_rate: f32,
    f_min: f32,
    f_max: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = n_fft / 2 + 1;

    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|i| i as f32 * sample_rate / n_fft as f32)
        .collect();

    let mel_min = hz_to_mel_slaney(f_min);
    let mel_max = hz_to_mel_slaney(f_max);

    let mel_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_min + i as f32 * (mel_max - mel_min) / (n_mels + 1) as f32)
        .collect();

    let hz_points: Vec<f32> = mel_points.iter().map(|&m| mel_to_hz_slaney(m)).collect();

    let mut filterbank = vec![vec![0.0_f32; n_freqs]; n_mels];

    for m in 0..n_mels {
        let f_left = hz_points[m];
        let f_center = hz_points[m + 1];
        let f_right = hz_points[m + 2];

        // Slaney normalization: 2 / (f_right - f_left)
        let enorm = 2.0 / (f_right - f_left);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            if freq >= f_left && freq < f_center {
                filterbank[m][k] = enorm * (freq - f_left) / (f_center - f_left);
            } else if freq >= f_center && freq <= f_right {
                filterbank[m][k] = enorm * (f_right - freq) / (f_right - f_center);
            }
        }
    }

    filterbank
}
