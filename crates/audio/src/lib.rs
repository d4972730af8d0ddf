//! Аудио-подсистема: загрузка WAV, ресемплинг и log-mel признаки.

pub mod features;
pub mod loader;
pub mod resample;

pub use features::FeatureExtractor;
pub use loader::{load_wav, to_mono};
pub use resample::Resampler;
