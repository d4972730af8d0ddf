//! Конфигурационные структуры для стримингового трансдьюсера.
//!
//! Один JSON-файл описывает весь запуск: фичи (`speech`), словарь (`text`),
//! гиперпараметры модели (`model`) и обучение (`learning`). Дефолтные
//! значения соответствуют стриминговой RNN-T конфигурации из
//! http://arxiv.org/abs/1811.06621.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RnntError, RnntResult};

/// Полная конфигурация запуска (обучение + инференс).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Конфигурация извлечения признаков.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Конфигурация текстового словаря.
    #[serde(default)]
    pub text: TextConfig,

    /// Гиперпараметры модели.
    #[serde(default)]
    pub model: ModelConfig,

    /// Конфигурация обучения.
    #[serde(default)]
    pub learning: LearningConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speech: SpeechConfig::default(),
            text: TextConfig::default(),
            model: ModelConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl Config {
    /// Загрузить конфигурацию из JSON-файла.
    pub fn from_file(path: impl AsRef<Path>) -> RnntResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            RnntError::Config(format!("Не удалось прочитать {:?}: {e}", path))
        })?;
        let config: Config = serde_json::from_str(&data).map_err(|e| {
            RnntError::Config(format!("Ошибка парсинга {:?}: {e}", path))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Проверка согласованности значений.
    pub fn validate(&self) -> RnntResult<()> {
        if self.speech.num_feature_bins == 0 {
            return Err(RnntError::Config("num_feature_bins must be > 0".into()));
        }
        if self.model.encoder_nlayers == 0 {
            return Err(RnntError::Config("encoder_nlayers must be > 0".into()));
        }
        if self.model.prediction_num_rnns == 0 {
            return Err(RnntError::Config("prediction_num_rnns must be > 0".into()));
        }
        for (&layer, &factor) in &self.model.encoder_reductions {
            if layer >= self.model.encoder_nlayers {
                return Err(RnntError::Config(format!(
                    "reduction for layer {layer} but encoder has {} layers",
                    self.model.encoder_nlayers
                )));
            }
            if factor < 2 {
                return Err(RnntError::Config(format!(
                    "reduction factor must be >= 2, got {factor} for layer {layer}"
                )));
            }
        }
        Ok(())
    }
}

/// Конфигурация log-mel спектрограммы.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Целевая частота дискретизации в Гц.
    pub sample_rate: usize,

    /// Длина окна анализа в миллисекундах.
    pub frame_ms: f32,

    /// Шаг между фреймами в миллисекундах.
    pub stride_ms: f32,

    /// Количество mel-бинов.
    pub num_feature_bins: usize,

    /// Коэффициент преэмфазиса (0.0 — выключен).
    pub preemphasis: f32,

    /// Нижняя граница mel-фильтров в Гц.
    pub f_min: f32,

    /// Верхняя граница mel-фильтров в Гц.
    pub f_max: f32,

    /// Нормализация каждого признака по времени (μ/σ).
    pub normalize_per_feature: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 25.0,
            stride_ms: 10.0,
            num_feature_bins: 80,
            preemphasis: 0.97,
            f_min: 0.0,
            f_max: 8000.0,
            normalize_per_feature: true,
        }
    }
}

impl SpeechConfig {
    /// Длина окна в сэмплах.
    pub fn frame_length(&self) -> usize {
        (self.sample_rate as f32 * self.frame_ms / 1000.0) as usize
    }

    /// Шаг между фреймами в сэмплах.
    pub fn frame_step(&self) -> usize {
        (self.sample_rate as f32 * self.stride_ms / 1000.0) as usize
    }

    /// Размер FFT: ближайшая степень двойки >= длины окна.
    pub fn n_fft(&self) -> usize {
        self.frame_length().next_power_of_two()
    }
}

/// Конфигурация символьного словаря.
///
/// `vocabulary: None` — английский алфавит по умолчанию (a-z, пробел,
/// апостроф). Файл словаря: одна строка — один символ, `#` — комментарий.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextConfig {
    /// Путь к файлу словаря (опционально).
    pub vocabulary: Option<PathBuf>,
}

/// Гиперпараметры стримингового трансдьюсера.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Факторы временной редукции: номер блока → фактор.
    pub encoder_reductions: BTreeMap<usize, usize>,

    /// Размерность проекции каждого блока энкодера.
    pub encoder_dmodel: usize,

    /// Количество блоков энкодера.
    pub encoder_nlayers: usize,

    /// Размер скрытого состояния LSTM энкодера.
    pub encoder_rnn_units: usize,

    /// Layer normalization после LSTM в блоках энкодера.
    pub encoder_layer_norm: bool,

    /// Размерность эмбеддинга предсказательной сети.
    pub prediction_embed_dim: usize,

    /// Dropout после эмбеддинга.
    pub prediction_embed_dropout: f32,

    /// Количество LSTM-слоёв предсказательной сети.
    pub prediction_num_rnns: usize,

    /// Размер скрытого состояния LSTM предсказательной сети.
    pub prediction_rnn_units: usize,

    /// Layer normalization в слоях предсказательной сети.
    pub prediction_layer_norm: bool,

    /// Размерность проекции предсказательной сети.
    pub prediction_projection_units: usize,

    /// Размерность joint-сети.
    pub joint_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::streaming()
    }
}

impl ModelConfig {
    /// Стриминговая конфигурация из статьи (8 блоков, редукция 3×2).
    pub fn streaming() -> Self {
        let mut encoder_reductions = BTreeMap::new();
        encoder_reductions.insert(0, 3);
        encoder_reductions.insert(1, 2);
        Self {
            encoder_reductions,
            encoder_dmodel: 640,
            encoder_nlayers: 8,
            encoder_rnn_units: 2048,
            encoder_layer_norm: true,
            prediction_embed_dim: 320,
            prediction_embed_dropout: 0.0,
            prediction_num_rnns: 2,
            prediction_rnn_units: 2048,
            prediction_layer_norm: true,
            prediction_projection_units: 640,
            joint_dim: 640,
        }
    }

    /// Уменьшенная конфигурация для тестов и отладки.
    pub fn tiny() -> Self {
        let mut encoder_reductions = BTreeMap::new();
        encoder_reductions.insert(0, 2);
        Self {
            encoder_reductions,
            encoder_dmodel: 32,
            encoder_nlayers: 2,
            encoder_rnn_units: 64,
            encoder_layer_norm: true,
            prediction_embed_dim: 16,
            prediction_embed_dropout: 0.0,
            prediction_num_rnns: 1,
            prediction_rnn_units: 64,
            prediction_layer_norm: true,
            prediction_projection_units: 32,
            joint_dim: 32,
        }
    }

    /// Суммарный фактор временной редукции энкодера.
    pub fn time_reduction_factor(&self) -> usize {
        self.encoder_reductions.values().product::<usize>().max(1)
    }
}

/// Конфигурация обучения.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Датасеты.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Оптимизатор.
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Параметры цикла обучения.
    #[serde(default)]
    pub running: RunningConfig,
}

/// Пути к спискам транскрипций.
///
/// Формат списка: `PATH\tDURATION\tTRANSCRIPT`, по строке на utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Списки для обучения.
    pub train_paths: Vec<PathBuf>,

    /// Списки для валидации.
    pub eval_paths: Vec<PathBuf>,
}

/// Гиперпараметры AdamW.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            beta1: 0.9,
            beta2: 0.98,
            epsilon: 1e-9,
            weight_decay: 0.0,
        }
    }
}

/// Параметры цикла обучения.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningConfig {
    /// Размер батча на обучении.
    pub batch_size: usize,

    /// Размер батча на валидации.
    pub eval_batch_size: usize,

    /// Количество эпох.
    pub num_epochs: usize,

    /// Директория чекпоинтов.
    pub checkpoint_dir: PathBuf,

    /// Логировать каждые N шагов.
    pub log_every_n_steps: usize,

    /// Сколько валидационных батчей декодировать жадно для WER.
    pub wer_eval_batches: usize,
}

impl Default for RunningConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            eval_batch_size: 4,
            num_epochs: 20,
            checkpoint_dir: PathBuf::from("checkpoints"),
            log_every_n_steps: 50,
            wer_eval_batches: 2,
        }
    }
}
