//! Предсказательная сеть трансдьюсера.
//!
//! Embedding(vocab, embed_dim) → Dropout → N × (LSTM → LN? → проекция).
//! При декодировании работает пошагово: один токен → один шаг LSTM,
//! состояние всех слоёв переносится снаружи.

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{embedding, layer_norm, Dropout, Embedding, LayerNorm, LayerNormConfig, Linear, VarBuilder};
use tracing::debug;

use rnnt_core::ModelConfig;

use crate::rnn::{LstmCell, LstmState};

/// Один рекуррентный слой предсказательной сети.
struct PredictionLayer {
    rnn: LstmCell,
    ln: Option<LayerNorm>,
    projection: Linear,
}

impl PredictionLayer {
    fn new(input_dim: usize, config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let rnn = LstmCell::new(input_dim, config.prediction_rnn_units, vb.pp("rnn"))?;
        let ln = if config.prediction_layer_norm {
            Some(layer_norm(
                config.prediction_rnn_units,
                LayerNormConfig::default(),
                vb.pp("ln"),
            )?)
        } else {
            None
        };
        let projection = candle_nn::linear(
            config.prediction_rnn_units,
            config.prediction_projection_units,
            vb.pp("projection"),
        )?;
        Ok(Self {
            rnn,
            ln,
            projection,
        })
    }

    fn forward_seq(&self, xs: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let (ys, new_state) = self.rnn.forward_seq(xs, state)?;
        let ys = match &self.ln {
            Some(ln) => ln.forward(&ys)?,
            None => ys,
        };
        Ok((self.projection.forward(&ys)?, new_state))
    }

    fn step(&self, x: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let (h, new_state) = self.rnn.step(x, state)?;
        let h = match &self.ln {
            Some(ln) => ln.forward(&h)?,
            None => h,
        };
        Ok((self.projection.forward(&h)?, new_state))
    }
}

/// Предсказательная сеть: embedding + N LSTM-слоёв с проекциями.
pub struct PredictionNet {
    embedding: Embedding,
    dropout: Dropout,
    layers: Vec<PredictionLayer>,
}

impl PredictionNet {
    /// Построить сеть по конфигурации.
    pub fn new(config: &ModelConfig, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        let embedding = embedding(vocab_size, config.prediction_embed_dim, vb.pp("embed"))?;
        let dropout = Dropout::new(config.prediction_embed_dropout);

        let mut layers = Vec::with_capacity(config.prediction_num_rnns);
        let mut dim = config.prediction_embed_dim;
        for i in 0..config.prediction_num_rnns {
            layers.push(PredictionLayer::new(dim, config, vb.pp(format!("rnn_{i}")))?);
            dim = config.prediction_projection_units;
        }

        debug!(
            "PredictionNet: vocab={}, embed={}, LSTM {}×{}",
            vocab_size,
            config.prediction_embed_dim,
            config.prediction_num_rnns,
            config.prediction_rnn_units
        );

        Ok(Self {
            embedding,
            dropout,
            layers,
        })
    }

    /// Нулевые состояния всех слоёв.
    pub fn initial_states(&self, batch: usize, device: &Device) -> Result<Vec<LstmState>> {
        self.layers
            .iter()
            .map(|l| l.rnn.zero_state(batch, device))
            .collect()
    }

    /// Обучающий прогон: ids [B, U+1] (с префиксом blank) → [B, U+1, P].
    pub fn forward(&self, ids: &Tensor, training: bool) -> Result<Tensor> {
        let mut xs = self.embedding.forward(ids)?;
        xs = self.dropout.forward(&xs, training)?;
        let batch = xs.dim(0)?;
        for layer in &self.layers {
            let state = layer.rnn.zero_state(batch, xs.device())?;
            let (ys, _) = layer.forward_seq(&xs, &state)?;
            xs = ys;
        }
        Ok(xs)
    }

    /// Один шаг декодирования: token → (выход [1, P], новые состояния).
    pub fn step(
        &self,
        token: u32,
        states: &[LstmState],
        device: &Device,
    ) -> Result<(Tensor, Vec<LstmState>)> {
        let ids = Tensor::new(&[token], device)?;
        let mut x = self.embedding.forward(&ids)?; // [1, embed_dim]

        let mut new_states = Vec::with_capacity(self.layers.len());
        for (layer, state) in self.layers.iter().zip(states.iter()) {
            let (y, new_state) = layer.step(&x, state)?;
            x = y;
            new_states.push(new_state);
        }
        Ok((x, new_states))
    }
}
