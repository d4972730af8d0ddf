//! # rnnt-core
//!
//! Базовые типы, конфигурация и обработка ошибок для RustRNNT.
//!
//! Этот крейт предоставляет фундаментальные абстракции для всех остальных
//! крейтов в workspace:
//!
//! - Общие типы данных (`AudioBuffer`, `FeatureTensor`, `TranscriptionResult`)
//! - Конфигурационное дерево запуска (`Config` и секции)
//! - Символьный словарь [`CharFeaturizer`] с blank на позиции 0
//! - Унифицированная обработка ошибок через `RnntError`

pub mod config;
pub mod error;
pub mod text;
pub mod types;

pub use config::{
    Config, DatasetConfig, LearningConfig, ModelConfig, OptimizerConfig, RunningConfig,
    SpeechConfig, TextConfig,
};
pub use error::{RnntError, RnntResult};
pub use text::{CharFeaturizer, BLANK};
pub use types::{AudioBuffer, FeatureTensor, TranscriptionResult};
