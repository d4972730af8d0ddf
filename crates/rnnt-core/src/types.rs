//! Общие типы данных для крейтов workspace.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Аудио-буфер
// ---------------------------------------------------------------------------

/// Буфер необработанного аудио.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Аудио-сэмплы (нормализованы к [-1.0, 1.0]).
    pub samples: Vec<f32>,

    /// Частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Количество каналов.
    pub channels: usize,
}

impl AudioBuffer {
    /// Создать новый буфер аудио.
    pub fn new(samples: Vec<f32>, sample_rate: usize, channels: usize) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Длительность в секундах.
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / (self.sample_rate * self.channels) as f32
    }

    /// Количество сэмплов на канал.
    pub fn num_samples(&self) -> usize {
        self.samples.len() / self.channels
    }
}

// ---------------------------------------------------------------------------
// Акустические признаки
// ---------------------------------------------------------------------------

/// Log-mel признаки одного utterance.
#[derive(Debug, Clone)]
pub struct FeatureTensor {
    /// Тензор формы [time, num_feature_bins].
    pub tensor: Tensor,

    /// Количество временных фреймов.
    pub num_frames: usize,

    /// Количество признаков на фрейм.
    pub num_bins: usize,
}

impl FeatureTensor {
    /// Создать признаки из тензора.
    pub fn new(tensor: Tensor, num_frames: usize, num_bins: usize) -> Self {
        Self {
            tensor,
            num_frames,
            num_bins,
        }
    }
}

// ---------------------------------------------------------------------------
// Результат распознавания
// ---------------------------------------------------------------------------

/// Результат транскрибации utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Распознанный текст.
    pub text: String,

    /// Время инференса в секундах.
    pub inference_time_secs: f64,

    /// Длительность аудио в секундах.
    pub audio_duration_secs: f64,

    /// Real-Time Factor (inference_time / audio_duration).
    /// Значение < 1.0 означает «быстрее реального времени».
    pub rtf: f64,
}

impl TranscriptionResult {
    /// Создать результат из текста и метрик производительности.
    pub fn new(text: String, inference_time_secs: f64, audio_duration_secs: f64) -> Self {
        let rtf = if audio_duration_secs > 0.0 {
            inference_time_secs / audio_duration_secs
        } else {
            0.0
        };
        Self {
            text,
            inference_time_secs,
            audio_duration_secs,
            rtf,
        }
    }
}
