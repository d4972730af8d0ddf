//! StreamingTransducer — сборка энкодера, предсказательной и joint-сетей.
//!
//! Три режима работы:
//! - `forward` — решётка логитов для обучения (RNN-T loss);
//! - `recognize` / `recognize_beam` — офлайн-распознавание целого utterance;
//! - `streaming_session` — пошаговый инференс с переносом состояний.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;
use tracing::{debug, info};

use rnnt_core::{ModelConfig, BLANK};

use crate::beam::BeamSearchDecoder;
use crate::encoder::StreamingEncoder;
use crate::greedy::GreedyDecoder;
use crate::joint::JointNetwork;
use crate::loss::rnnt_loss;
use crate::prediction::PredictionNet;
use crate::rnn::LstmState;
use crate::streaming::StreamingSession;

/// Стриминговый RNN-Transducer.
pub struct StreamingTransducer {
    encoder: StreamingEncoder,
    prediction: PredictionNet,
    joint: JointNetwork,
    device: Device,
    dtype: DType,
    blank: u32,
}

impl StreamingTransducer {
    /// Построить модель.
    ///
    /// Один и тот же код создаёт свежие веса (обучение) и загружает
    /// checkpoint (инференс) — это определяется содержимым `vb`.
    pub fn new(
        config: &ModelConfig,
        input_dim: usize,
        vocab_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let encoder = StreamingEncoder::new(config, input_dim, vb.pp("encoder"))?;
        let prediction = PredictionNet::new(config, vocab_size, vb.pp("prediction"))?;
        let joint = JointNetwork::new(config, vocab_size, vb.pp("joint"))?;
        let device = vb.device().clone();
        let dtype = vb.dtype();

        info!(
            "StreamingTransducer: {} блоков энкодера, dmodel={}, vocab={}, редукция ×{}",
            config.encoder_nlayers,
            config.encoder_dmodel,
            vocab_size,
            encoder.time_reduction_factor()
        );

        Ok(Self {
            encoder,
            prediction,
            joint,
            device,
            dtype,
            blank: BLANK,
        })
    }

    /// Суммарный фактор временной редукции энкодера.
    pub fn time_reduction_factor(&self) -> usize {
        self.encoder.time_reduction_factor()
    }

    /// Устройство, на котором живут веса.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Длина выхода энкодера для `t` входных фреймов.
    pub fn reduced_length(&self, t: usize) -> usize {
        self.encoder.reduced_length(t)
    }

    /// Обучающий прогон: features [B, T, F], pred_inputs [B, U+1]
    /// (метки с префиксом blank) → logits [B, T', U+1, V].
    pub fn forward(
        &self,
        features: &Tensor,
        pred_inputs: &Tensor,
        training: bool,
    ) -> Result<Tensor> {
        let features = features.to_dtype(self.dtype)?;
        let encoded = self.encoder.forward(&features)?;
        let predicted = self.prediction.forward(pred_inputs, training)?;
        self.joint.forward(&encoded, &predicted)
    }

    /// Полный шаг обучения: прогон + RNN-T loss.
    ///
    /// `feature_lengths` — длины в фреймах до редукции; длины логитов
    /// вычисляются как ceil(len / reduction_factor).
    pub fn compute_loss(
        &self,
        features: &Tensor,
        pred_inputs: &Tensor,
        targets: &Tensor,
        feature_lengths: &[usize],
        target_lengths: &[usize],
        training: bool,
    ) -> Result<Tensor> {
        let logits = self.forward(features, pred_inputs, training)?;
        let logit_lengths: Vec<usize> = feature_lengths
            .iter()
            .map(|&l| self.encoder.reduced_length(l).max(1))
            .collect();
        rnnt_loss(&logits, targets, &logit_lengths, target_lengths, self.blank)
    }

    /// Стриминговый прогон энкодера: features [T, F] + состояния →
    /// ([T', E], новые состояния).
    pub fn encoder_inference(
        &self,
        features: &Tensor,
        states: &[LstmState],
    ) -> Result<(Tensor, Vec<LstmState>)> {
        let xs = features.to_dtype(self.dtype)?.unsqueeze(0)?;
        let (encoded, new_states) = self.encoder.recognize(&xs, states)?;
        Ok((encoded.squeeze(0)?, new_states))
    }

    /// Жадное распознавание целого utterance: features [T, F] → токены.
    pub fn recognize(&self, features: &Tensor) -> Result<Vec<u32>> {
        if features.dim(0)? == 0 {
            return Ok(Vec::new());
        }
        let states = self.encoder.initial_states(1, &self.device)?;
        let (encoded, _) = self.encoder_inference(features, &states)?;

        let pred_states = self.prediction.initial_states(1, &self.device)?;
        let hyp = GreedyDecoder::new(self.blank).decode(
            &encoded,
            &self.prediction,
            &self.joint,
            self.blank,
            pred_states,
        )?;
        debug!("recognize: {} токенов", hyp.tokens.len());
        Ok(hyp.tokens)
    }

    /// Beam search распознавание целого utterance.
    pub fn recognize_beam(&self, features: &Tensor, beam_width: usize) -> Result<Vec<u32>> {
        if features.dim(0)? == 0 {
            return Ok(Vec::new());
        }
        let states = self.encoder.initial_states(1, &self.device)?;
        let (encoded, _) = self.encoder_inference(features, &states)?;

        let hyp = BeamSearchDecoder::new(beam_width, self.blank).decode(
            &encoded,
            &self.prediction,
            &self.joint,
        )?;
        Ok(hyp.tokens)
    }

    /// Новая стриминговая сессия с нулевыми состояниями.
    pub fn streaming_session(&self) -> Result<StreamingSession<'_>> {
        StreamingSession::new(self)
    }

    pub(crate) fn encoder_ref(&self) -> &StreamingEncoder {
        &self.encoder
    }

    pub(crate) fn prediction_ref(&self) -> &PredictionNet {
        &self.prediction
    }

    pub(crate) fn joint_ref(&self) -> &JointNetwork {
        &self.joint
    }

    pub(crate) fn blank(&self) -> u32 {
        self.blank
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
    fn test_forward_lattice_shape() {
        let model = tiny_model(29);
        let device = Device::Cpu;

        let features = Tensor::randn(0.0_f32, 1.0, (2, 10, 8), &device).unwrap();
        let pred_inputs = Tensor::zeros((2, 4), DType::U32, &device).unwrap();

        let logits = model.forward(&features, &pred_inputs, true).unwrap();
        // tiny: редукция ×2 → 5 фреймов
        assert_eq!(logits.dims(), &[2, 5, 4, 29]);
    }

    #[test]
    fn test_compute_loss_finite() {
        let model = tiny_model(9);
        let device = Device::Cpu;

        let features = Tensor::randn(0.0_f32, 1.0, (2, 8, 8), &device).unwrap();
        let pred_inputs = Tensor::new(&[[0u32, 1, 2], [0, 3, 0]], &device).unwrap();
        let targets = Tensor::new(&[[1u32, 2], [3, 0]], &device).unwrap();

        let loss = model
            .compute_loss(&features, &pred_inputs, &targets, &[8, 6], &[2, 1], true)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn test_recognize_empty_features() {
        let model = tiny_model(9);
        let device = Device::Cpu;
        let features = Tensor::zeros((0, 8), DType::F32, &device).unwrap();
        let tokens = model.recognize(&features).unwrap();
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_recognize_produces_valid_tokens() {
        let model = tiny_model(9);
        let device = Device::Cpu;
        let features = Tensor::randn(0.0_f32, 1.0, (12, 8), &device).unwrap();
        let tokens = model.recognize(&features).unwrap();
        assert!(tokens.iter().all(|&t| t != 0 && t < 9));
    }
}
