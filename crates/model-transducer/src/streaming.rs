//! Стриминговая сессия: инференс по-чанково с переносом состояний.
//!
//! Сессия держит состояния LSTM энкодера (по одному на блок), состояния
//! предсказательной сети и последний выданный токен. Каждый вызов `feed`
//! принимает признаки очередного чанка и возвращает токены, выданные на
//! этом чанке; полная гипотеза накапливается внутри.

use candle_core::{Result, Tensor};
use tracing::debug;

use crate::greedy::GreedyDecoder;
use crate::model::StreamingTransducer;
use crate::rnn::LstmState;

/// Состояние одного стримингового распознавания.
pub struct StreamingSession<'a> {
    model: &'a StreamingTransducer,
    encoder_states: Vec<LstmState>,
    prediction_states: Vec<LstmState>,
    last_token: u32,
    tokens: Vec<u32>,
}

impl<'a> StreamingSession<'a> {
    /// Новая сессия с нулевыми состояниями.
    pub fn new(model: &'a StreamingTransducer) -> Result<Self> {
        let encoder_states = model.encoder_ref().initial_states(1, model.device())?;
        let prediction_states = model.prediction_ref().initial_states(1, model.device())?;
        Ok(Self {
            model,
            encoder_states,
            prediction_states,
            last_token: model.blank(),
            tokens: Vec::new(),
        })
    }

    /// Скормить чанк признаков [T, F]; вернуть токены, выданные на чанке.
    pub fn feed(&mut self, features: &Tensor) -> Result<Vec<u32>> {
        if features.dim(0)? == 0 {
            return Ok(Vec::new());
        }

        let (encoded, encoder_states) = self
            .model
            .encoder_inference(features, &self.encoder_states)?;
        self.encoder_states = encoder_states;

        if encoded.dim(0)? == 0 {
            return Ok(Vec::new());
        }

        let decoder = GreedyDecoder::new(self.model.blank());
        let hyp = decoder.decode(
            &encoded,
            self.model.prediction_ref(),
            self.model.joint_ref(),
            self.last_token,
            std::mem::take(&mut self.prediction_states),
        )?;

        self.last_token = hyp.last_token;
        self.prediction_states = hyp.states;
        self.tokens.extend_from_slice(&hyp.tokens);

        debug!(
            "stream feed: {} фреймов → +{} токенов (всего {})",
            features.dim(0)?,
            hyp.tokens.len(),
            self.tokens.len()
        );

        Ok(hyp.tokens)
    }

    /// Все токены, накопленные с начала сессии.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Сбросить сессию к начальному состоянию.
    pub fn reset(&mut self) -> Result<()> {
        self.encoder_states = self
            .model
            .encoder_ref()
            .initial_states(1, self.model.device())?;
        self.prediction_states = self
            .model
            .prediction_ref()
            .initial_states(1, self.model.device())?;
        self.last_token = self.model.blank();
        self.tokens.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use rnnt_core::ModelConfig;

    fn tiny_model(vocab: usize) -> StreamingTransducer {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        StreamingTransducer::new(&ModelConfig::tiny(), 8, vocab, vb).unwrap()
    }

    #[test]
    fn test_session_accumulates_tokens() {
        let model = tiny_model(9);
        let device = Device::Cpu;
        let mut session = model.streaming_session().unwrap();

        let chunk = Tensor::randn(0.0_f32, 1.0, (4, 8), &device).unwrap();
        let fresh = session.feed(&chunk).unwrap();
        assert_eq!(session.tokens().len(), fresh.len());

        let more = session.feed(&chunk).unwrap();
        assert_eq!(session.tokens().len(), fresh.len() + more.len());
    }

    #[test]
    fn test_session_reset() {
        let model = tiny_model(9);
        let device = Device::Cpu;
        let mut session = model.streaming_session().unwrap();

        let chunk = Tensor::randn(0.0_f32, 1.0, (6, 8), &device).unwrap();
        session.feed(&chunk).unwrap();
        session.reset().unwrap();
        assert!(session.tokens().is_empty());
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let model = tiny_model(9);
        let device = Device::Cpu;
        let mut session = model.streaming_session().unwrap();
        let empty = Tensor::zeros((0, 8), DType::F32, &device).unwrap();
        assert!(session.feed(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_chunked_matches_offline_greedy() {
        // Чанки, кратные фактору редукции, дают ту же гипотезу, что и
        // офлайн-прогон recognize по целому utterance
        let model = tiny_model(9);
        let device = Device::Cpu;

        let features = Tensor::randn(0.0_f32, 1.0, (8, 8), &device).unwrap();
        let offline = model.recognize(&features).unwrap();

        let mut session = model.streaming_session().unwrap();
        let mut streamed = Vec::new();
        for start in [0usize, 4] {
            let chunk = features.narrow(0, start, 4).unwrap();
            streamed.extend(session.feed(&chunk).unwrap());
        }

        assert_eq!(offline, streamed);
    }
}
