//! Обучение стримингового трансдьюсера: датасет, батчи, метрики,
//! чекпоинты и сам цикл обучения.

pub mod batcher;
pub mod checkpoint;
pub mod dataset;
pub mod metrics;
pub mod trainer;

pub use batcher::{make_batch, Batch};
pub use checkpoint::CheckpointManager;
pub use dataset::{read_transcript_lists, AsrDataset, TranscriptEntry};
pub use metrics::{cer, edit_distance, wer, EpochMetrics, MetricsLogger};
pub use trainer::{TrainOptions, TransducerTrainer};
