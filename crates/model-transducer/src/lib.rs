//! Стриминговый RNN-Transducer на Candle.
//!
//! Энкодер из LSTM-блоков с временной редукцией + предсказательная сеть +
//! joint-сеть (http://arxiv.org/abs/1811.06621). Состояние каждого
//! рекуррентного слоя выносится наружу, поэтому инференс работает
//! по-чанково: аудио можно кормить кусками, перенося состояние между
//! вызовами.

pub mod beam;
pub mod encoder;
pub mod greedy;
pub mod joint;
pub mod loss;
pub mod model;
pub mod prediction;
pub mod rnn;
pub mod streaming;

pub use beam::BeamSearchDecoder;
pub use encoder::{StreamingEncoder, TimeReduction};
pub use greedy::{GreedyDecoder, Hypothesis};
pub use joint::JointNetwork;
pub use loss::rnnt_loss;
pub use model::StreamingTransducer;
pub use prediction::PredictionNet;
pub use rnn::{LstmCell, LstmState};
pub use streaming::StreamingSession;
