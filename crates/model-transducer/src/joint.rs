//! Joint-сеть трансдьюсера.
//!
//! joint = tanh(ffn_enc(enc) + ffn_pred(pred))
//! logits = ffn_out(joint)
//!
//! На обучении проекции энкодера и предсказательной сети складываются
//! broadcast'ом по решётке [B, T, U+1, joint_dim], на декодировании —
//! поточечно для одного фрейма и одного шага предсказательной сети.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use rnnt_core::ModelConfig;

/// Joint-сеть: две проекции, tanh, выход в словарь.
pub struct JointNetwork {
    ffn_enc: Linear,
    ffn_pred: Linear,
    ffn_out: Linear,
    vocab_size: usize,
}

impl JointNetwork {
    /// Построить joint-сеть по конфигурации.
    pub fn new(config: &ModelConfig, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        let ffn_enc = candle_nn::linear(config.encoder_dmodel, config.joint_dim, vb.pp("ffn_enc"))?;
        let ffn_pred = candle_nn::linear(
            config.prediction_projection_units,
            config.joint_dim,
            vb.pp("ffn_pred"),
        )?;
        let ffn_out = candle_nn::linear(config.joint_dim, vocab_size, vb.pp("ffn_out"))?;
        Ok(Self {
            ffn_enc,
            ffn_pred,
            ffn_out,
            vocab_size,
        })
    }

    /// Размер словаря (включая blank).
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Обучающий прогон по всей решётке:
    /// enc [B, T, E], pred [B, U+1, P] → logits [B, T, U+1, V].
    pub fn forward(&self, enc: &Tensor, pred: &Tensor) -> Result<Tensor> {
        let enc_h = self.ffn_enc.forward(enc)?.unsqueeze(2)?; // [B, T, 1, J]
        let pred_h = self.ffn_pred.forward(pred)?.unsqueeze(1)?; // [B, 1, U+1, J]
        let joint = enc_h.broadcast_add(&pred_h)?.tanh()?;
        self.ffn_out.forward(&joint)
    }

    /// Один шаг декодирования: enc_frame [E] или [1, E], pred_out [1, P] →
    /// logits [V].
    pub fn step(&self, enc_frame: &Tensor, pred_out: &Tensor) -> Result<Tensor> {
        let enc_in = if enc_frame.dims().len() == 1 {
            enc_frame.unsqueeze(0)?
        } else {
            enc_frame.clone()
        };
        let enc_h = self.ffn_enc.forward(&enc_in)?;
        let pred_h = self.ffn_pred.forward(pred_out)?;
        let joint = (enc_h + pred_h)?.tanh()?;
        self.ffn_out.forward(&joint)?.squeeze(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use rnnt_core::ModelConfig;

    fn test_joint(vocab: usize) -> JointNetwork {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        JointNetwork::new(&ModelConfig::tiny(), vocab, vb).unwrap()
    }

    #[test]
    fn test_forward_lattice_shape() {
        let config = ModelConfig::tiny();
        let joint = test_joint(29);
        let device = Device::Cpu;

        let enc = Tensor::zeros((2, 6, config.encoder_dmodel), DType::F32, &device).unwrap();
        let pred = Tensor::zeros(
            (2, 4, config.prediction_projection_units),
            DType::F32,
            &device,
        )
        .unwrap();

        let logits = joint.forward(&enc, &pred).unwrap();
        assert_eq!(logits.dims(), &[2, 6, 4, 29]);
    }

    #[test]
    fn test_step_shape() {
        let config = ModelConfig::tiny();
        let joint = test_joint(29);
        let device = Device::Cpu;

        let enc_frame = Tensor::zeros(config.encoder_dmodel, DType::F32, &device).unwrap();
        let pred_out = Tensor::zeros(
            (1, config.prediction_projection_units),
            DType::F32,
            &device,
        )
        .unwrap();

        let logits = joint.step(&enc_frame, &pred_out).unwrap();
        assert_eq!(logits.dims(), &[29]);
    }

    #[test]
    fn test_step_consistent_with_lattice() {
        // Поточечный step совпадает с ячейкой полной решётки
        let config = ModelConfig::tiny();
        let joint = test_joint(11);
        let device = Device::Cpu;

        let enc = Tensor::randn(0.0_f32, 1.0, (1, 3, config.encoder_dmodel), &device).unwrap();
        let pred = Tensor::randn(
            0.0_f32,
            1.0,
            (1, 2, config.prediction_projection_units),
            &device,
        )
        .unwrap();

        let lattice = joint.forward(&enc, &pred).unwrap(); // [1, 3, 2, 11]

        let enc_frame = enc.narrow(1, 1, 1).unwrap().squeeze(1).unwrap(); // [1, E]
        let pred_out = pred.narrow(1, 0, 1).unwrap().squeeze(1).unwrap(); // [1, P]
        let step_logits = joint.step(&enc_frame, &pred_out).unwrap();

        let cell: Vec<f32> = lattice
            .narrow(1, 1, 1)
            .unwrap()
            .narrow(2, 0, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let step: Vec<f32> = step_logits.to_vec1().unwrap();
        for (a, b) in cell.iter().zip(step.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
