//! Жадное декодирование RNN-T.
//!
//! Алгоритм (по одному вызову joint на фрейм энкодера):
//! 1. Для каждого фрейма: шаг предсказательной сети от последнего
//!    выданного токена и его состояния.
//! 2. argmax(log_softmax(joint(enc[t], pred_out))).
//! 3. Не-blank: токен добавляется к гипотезе, состояние принимается.
//!    Blank: состояние откатывается. Время всегда двигается на 1.

use candle_core::{IndexOp, Result, Tensor, D};
use tracing::debug;

use crate::joint::JointNetwork;
use crate::prediction::PredictionNet;
use crate::rnn::LstmState;

/// Гипотеза декодирования: токены + состояние для продолжения стрима.
pub struct Hypothesis {
    /// Выданные токены (без blank).
    pub tokens: Vec<u32>,

    /// Последний выданный токен (или blank, если ничего не выдано).
    pub last_token: u32,

    /// Состояния предсказательной сети после последнего не-blank токена.
    pub states: Vec<LstmState>,
}

/// Жадный декодер.
pub struct GreedyDecoder {
    blank: u32,
}

impl GreedyDecoder {
    pub fn new(blank: u32) -> Self {
        Self { blank }
    }

    /// Декодировать выход энкодера.
    ///
    /// `encoded`: [T, E] — выход энкодера без batch-размерности.
    /// `last_token` / `states` — продолжение стрима; для нового utterance
    /// это blank и нулевые состояния.
    pub fn decode(
        &self,
        encoded: &Tensor,
        prediction: &PredictionNet,
        joint: &JointNetwork,
        last_token: u32,
        states: Vec<LstmState>,
    ) -> Result<Hypothesis> {
        let t_total = encoded.dim(0)?;
        let device = encoded.device();

        let mut hypothesis = Hypothesis {
            tokens: Vec::new(),
            last_token,
            states,
        };

        for time_idx in 0..t_total {
            let enc_frame = encoded.i(time_idx)?; // [E]

            let (pred_out, new_states) =
                prediction.step(hypothesis.last_token, &hypothesis.states, device)?;

            let logits = joint.step(&enc_frame, &pred_out)?;
            let k = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if k != self.blank {
                hypothesis.tokens.push(k);
                hypothesis.last_token = k;
                hypothesis.states = new_states;
            }
            // Blank: состояние не меняется, двигаемся к следующему фрейму
        }

        debug!(
            "greedy decode: {} фреймов → {} токенов",
            t_total,
            hypothesis.tokens.len()
        );

        Ok(hypothesis)
    }
}
