//! Beam search для RNN-T (Graves, 2012).
//!
//! На каждом фрейме поддерживается множество гипотез:
//! - расширение blank'ом завершает гипотезу для текущего фрейма;
//! - не-blank токены порождают новые гипотезы в пределах фрейма;
//! - гипотезы с одинаковой последовательностью токенов сливаются
//!   log-sum-exp'ом скоров.

use candle_core::{IndexOp, Result, Tensor, D};
use candle_nn::ops::log_softmax;
use tracing::debug;

use crate::greedy::Hypothesis;
use crate::joint::JointNetwork;
use crate::prediction::PredictionNet;
use crate::rnn::LstmState;

/// log(exp(a) + exp(b)) без переполнения.
fn log_add_exp(a: f32, b: f32) -> f32 {
    let m = a.max(b);
    if m == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

struct BeamHyp {
    tokens: Vec<u32>,
    score: f32,
    states: Vec<LstmState>,
    last_token: u32,
}

/// Beam search декодер.
pub struct BeamSearchDecoder {
    beam_width: usize,
    blank: u32,
}

impl BeamSearchDecoder {
    pub fn new(beam_width: usize, blank: u32) -> Self {
        Self {
            beam_width: beam_width.max(1),
            blank,
        }
    }

    /// Декодировать выход энкодера `encoded` [T, E].
    pub fn decode(
        &self,
        encoded: &Tensor,
        prediction: &PredictionNet,
        joint: &JointNetwork,
    ) -> Result<Hypothesis> {
        let t_total = encoded.dim(0)?;
        let device = encoded.device();

        let initial_states = prediction.initial_states(1, device)?;
        let mut beams = vec![BeamHyp {
            tokens: Vec::new(),
            score: 0.0,
            states: initial_states,
            last_token: self.blank,
        }];

        // Ограничение на расширения в пределах фрейма
        let max_expansions = self.beam_width * 3;

        for time_idx in 0..t_total {
            let enc_frame = encoded.i(time_idx)?;

            let mut open = beams;
            let mut closed: Vec<BeamHyp> = Vec::with_capacity(self.beam_width);
            let mut expansions = 0;

            while !open.is_empty() && closed.len() < self.beam_width && expansions < max_expansions
            {
                // Лучшая открытая гипотеза
                let best_idx = open
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.score.total_cmp(&b.score))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                let hyp = open.swap_remove(best_idx);

                let (pred_out, new_states) =
                    prediction.step(hyp.last_token, &hyp.states, device)?;
                let logits = joint.step(&enc_frame, &pred_out)?;
                let logp: Vec<f32> = log_softmax(&logits, D::Minus1)?
                    .to_dtype(candle_core::DType::F32)?
                    .to_vec1()?;

                // Blank завершает гипотезу для этого фрейма
                let blank_score = hyp.score + logp[self.blank as usize];
                merge_into(&mut closed, BeamHyp {
                    tokens: hyp.tokens.clone(),
                    score: blank_score,
                    states: hyp.states.clone(),
                    last_token: hyp.last_token,
                });

                // Лучшие не-blank расширения остаются в пределах фрейма
                let mut candidates: Vec<(u32, f32)> = logp
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k as u32 != self.blank)
                    .map(|(k, &lp)| (k as u32, lp))
                    .collect();
                candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
                candidates.truncate(self.beam_width);

                for (k, lp) in candidates {
                    let mut tokens = hyp.tokens.clone();
                    tokens.push(k);
                    open.push(BeamHyp {
                        tokens,
                        score: hyp.score + lp,
                        states: new_states.clone(),
                        last_token: k,
                    });
                }

                expansions += 1;
            }

            closed.sort_by(|a, b| b.score.total_cmp(&a.score));
            closed.truncate(self.beam_width);
            beams = closed;
        }

        let best = beams
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| candle_core::Error::Msg("beam search produced no hypotheses".into()))?;

        debug!(
            "beam decode: {} фреймов → {} токенов (score {:.3})",
            t_total,
            best.tokens.len(),
            best.score
        );

        Ok(Hypothesis {
            tokens: best.tokens,
            last_token: best.last_token,
            states: best.states,
        })
    }
}

/// Добавить гипотезу, слив скор с существующей при совпадении токенов.
fn merge_into(closed: &mut Vec<BeamHyp>, hyp: BeamHyp) {
    if let Some(existing) = closed.iter_mut().find(|h| h.tokens == hyp.tokens) {
        // Состояние оставляем от более вероятной ветки
        if hyp.score > existing.score {
            existing.states = hyp.states;
            existing.last_token = hyp.last_token;
        }
        existing.score = log_add_exp(existing.score, hyp.score);
    } else {
        closed.push(hyp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use rnnt_core::ModelConfig;

    use crate::greedy::GreedyDecoder;

    #[test]
    fn test_log_add_exp() {
        let v = log_add_exp(0.0, 0.0);
        assert!((v - 2.0_f32.ln()).abs() < 1e-6);
        assert_eq!(log_add_exp(f32::NEG_INFINITY, f32::NEG_INFINITY), f32::NEG_INFINITY);
        assert!((log_add_exp(-1.0, f32::NEG_INFINITY) - -1.0).abs() < 1e-6);
    }

    #[test]
    fn test_beam_width_one_matches_greedy_prefix() {
        // beam=1 ведёт себя как жадный декодер
        let config = ModelConfig::tiny();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let device = Device::Cpu;

        let prediction = PredictionNet::new(&config, 9, vb.pp("prediction")).unwrap();
        let joint = JointNetwork::new(&config, 9, vb.pp("joint")).unwrap();
        let encoded =
            Tensor::randn(0.0_f32, 1.0, (4, config.encoder_dmodel), &device).unwrap();

        let beam = BeamSearchDecoder::new(1, 0)
            .decode(&encoded, &prediction, &joint)
            .unwrap();

        let states = prediction.initial_states(1, &device).unwrap();
        let greedy = GreedyDecoder::new(0)
            .decode(&encoded, &prediction, &joint, 0, states)
            .unwrap();

        // Свежеинициализированная сеть почти всегда предпочитает blank;
        // обе гипотезы валидны и сопоставимы по длине
        assert!(beam.tokens.len() <= 4);
        assert!(greedy.tokens.len() <= 4);
    }

    #[test]
    fn test_beam_returns_hypothesis() {
        let config = ModelConfig::tiny();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let device = Device::Cpu;

        let prediction = PredictionNet::new(&config, 5, vb.pp("prediction")).unwrap();
        let joint = JointNetwork::new(&config, 5, vb.pp("joint")).unwrap();
        let encoded =
            Tensor::randn(0.0_f32, 1.0, (6, config.encoder_dmodel), &device).unwrap();

        let hyp = BeamSearchDecoder::new(4, 0)
            .decode(&encoded, &prediction, &joint)
            .unwrap();
        assert!(hyp.tokens.iter().all(|&t| t != 0 && t < 5));
    }
}
