//! Энкодер стримингового трансдьюсера.
//!
//! Стек из N блоков: опциональная временная редукция → LSTM → layer norm →
//! проекция в dmodel. Редукция с фактором f склеивает f соседних фреймов в
//! один ([B, T, F] → [B, T/f, F*f]), укорачивая последовательность перед
//! дорогими рекуррентными слоями.
//!
//! `forward` — обучение (нулевые начальные состояния), `recognize` —
//! стриминговый инференс с переносом состояний между вызовами.

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{layer_norm, LayerNorm, LayerNormConfig, Linear, VarBuilder};
use tracing::debug;

use rnnt_core::ModelConfig;

use crate::rnn::{LstmCell, LstmState};

/// Временная редукция: склейка соседних фреймов.
#[derive(Debug)]
pub struct TimeReduction {
    factor: usize,
}

impl TimeReduction {
    pub fn new(factor: usize) -> Self {
        Self { factor }
    }

    /// [B, T, F] → [B, ceil(T/f), F*f], хвост дополняется нулями.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, t, f) = xs.dims3()?;
        let pad = (self.factor - t % self.factor) % self.factor;
        let xs = if pad > 0 {
            xs.pad_with_zeros(1, 0, pad)?
        } else {
            xs.clone()
        };
        xs.contiguous()?
            .reshape((b, (t + pad) / self.factor, f * self.factor))
    }
}

/// Один блок энкодера: редукция? → LSTM → LN? → проекция.
pub struct EncoderBlock {
    reduction: Option<TimeReduction>,
    rnn: LstmCell,
    ln: Option<LayerNorm>,
    projection: Linear,
}

impl EncoderBlock {
    fn new(
        reduction_factor: usize,
        input_dim: usize,
        config: &ModelConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (reduction, rnn_input) = if reduction_factor > 0 {
            (
                Some(TimeReduction::new(reduction_factor)),
                input_dim * reduction_factor,
            )
        } else {
            (None, input_dim)
        };

        let rnn = LstmCell::new(rnn_input, config.encoder_rnn_units, vb.pp("rnn"))?;

        let ln = if config.encoder_layer_norm {
            Some(layer_norm(
                config.encoder_rnn_units,
                LayerNormConfig::default(),
                vb.pp("ln"),
            )?)
        } else {
            None
        };

        let projection = candle_nn::linear(
            config.encoder_rnn_units,
            config.encoder_dmodel,
            vb.pp("projection"),
        )?;

        Ok(Self {
            reduction,
            rnn,
            ln,
            projection,
        })
    }

    /// Обучающий прогон с нулевым начальным состоянием.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = match &self.reduction {
            Some(r) => r.forward(xs)?,
            None => xs.clone(),
        };
        let batch = xs.dim(0)?;
        let state = self.rnn.zero_state(batch, xs.device())?;
        let (ys, _) = self.rnn.forward_seq(&xs, &state)?;
        let ys = match &self.ln {
            Some(ln) => ln.forward(&ys)?,
            None => ys,
        };
        self.projection.forward(&ys)
    }

    /// Стриминговый прогон: состояние приходит снаружи и возвращается.
    pub fn recognize(&self, xs: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let xs = match &self.reduction {
            Some(r) => r.forward(xs)?,
            None => xs.clone(),
        };
        let (ys, new_state) = self.rnn.forward_seq(&xs, state)?;
        let ys = match &self.ln {
            Some(ln) => ln.forward(&ys)?,
            None => ys,
        };
        Ok((self.projection.forward(&ys)?, new_state))
    }

    fn zero_state(&self, batch: usize, device: &Device) -> Result<LstmState> {
        self.rnn.zero_state(batch, device)
    }
}

/// Стек блоков энкодера.
pub struct StreamingEncoder {
    blocks: Vec<EncoderBlock>,
    time_reduction_factor: usize,
    dmodel: usize,
}

impl StreamingEncoder {
    /// Построить энкодер по конфигурации.
    ///
    /// `input_dim` — количество признаков на фрейм (mel-бинов).
    pub fn new(config: &ModelConfig, input_dim: usize, vb: VarBuilder) -> Result<Self> {
        let mut blocks = Vec::with_capacity(config.encoder_nlayers);
        let mut dim = input_dim;
        for i in 0..config.encoder_nlayers {
            let factor = config.encoder_reductions.get(&i).copied().unwrap_or(0);
            let block = EncoderBlock::new(factor, dim, config, vb.pp(format!("block_{i}")))?;
            blocks.push(block);
            // Каждый блок проецирует в dmodel
            dim = config.encoder_dmodel;
        }

        let time_reduction_factor = config.time_reduction_factor();
        debug!(
            "StreamingEncoder: {} блоков, dmodel={}, редукция ×{}",
            blocks.len(),
            config.encoder_dmodel,
            time_reduction_factor
        );

        Ok(Self {
            blocks,
            time_reduction_factor,
            dmodel: config.encoder_dmodel,
        })
    }

    /// Суммарный фактор временной редукции.
    pub fn time_reduction_factor(&self) -> usize {
        self.time_reduction_factor
    }

    /// Размерность выхода энкодера.
    pub fn dmodel(&self) -> usize {
        self.dmodel
    }

    /// Длина выхода для входа длины `t` (в фреймах).
    pub fn reduced_length(&self, t: usize) -> usize {
        t.div_ceil(self.time_reduction_factor)
    }

    /// Нулевые состояния всех блоков.
    pub fn initial_states(&self, batch: usize, device: &Device) -> Result<Vec<LstmState>> {
        self.blocks
            .iter()
            .map(|b| b.zero_state(batch, device))
            .collect()
    }

    /// Обучающий прогон: [B, T, F] → [B, T', dmodel].
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut ys = xs.clone();
        for block in &self.blocks {
            ys = block.forward(&ys)?;
        }
        Ok(ys)
    }

    /// Стриминговый прогон со списком состояний (по одному на блок).
    pub fn recognize(&self, xs: &Tensor, states: &[LstmState]) -> Result<(Tensor, Vec<LstmState>)> {
        let mut ys = xs.clone();
        let mut new_states = Vec::with_capacity(self.blocks.len());
        for (block, state) in self.blocks.iter().zip(states.iter()) {
            let (out, new_state) = block.recognize(&ys, state)?;
            ys = out;
            new_states.push(new_state);
        }
        Ok((ys, new_states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use rnnt_core::ModelConfig;

    fn test_encoder(config: &ModelConfig, input_dim: usize) -> StreamingEncoder {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        StreamingEncoder::new(config, input_dim, vb).unwrap()
    }

    #[test]
    fn test_time_reduction_shapes() {
        let device = Device::Cpu;
        let reduction = TimeReduction::new(3);
        let xs = Tensor::zeros((1, 7, 4), DType::F32, &device).unwrap();
        let ys = reduction.forward(&xs).unwrap();
        // 7 фреймов с фактором 3 → паддинг до 9 → 3 фрейма по 12 признаков
        assert_eq!(ys.dims(), &[1, 3, 12]);
    }

    #[test]
    fn test_time_reduction_merges_consecutive_frames() {
        let device = Device::Cpu;
        let reduction = TimeReduction::new(2);
        // Фреймы [0,0], [1,1], [2,2], [3,3]
        let data: Vec<f32> = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
        let xs = Tensor::from_vec(data, (1, 4, 2), &device).unwrap();
        let ys = reduction.forward(&xs).unwrap();
        assert_eq!(ys.dims(), &[1, 2, 4]);
        let row0: Vec<f32> = ys.narrow(1, 0, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(row0, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_encoder_output_shape() {
        let config = ModelConfig::tiny();
        let encoder = test_encoder(&config, 8);
        let device = Device::Cpu;

        let xs = Tensor::randn(0.0_f32, 1.0, (2, 12, 8), &device).unwrap();
        let ys = encoder.forward(&xs).unwrap();
        // tiny: редукция ×2 в блоке 0
        assert_eq!(ys.dims(), &[2, 6, config.encoder_dmodel]);
    }

    #[test]
    fn test_reduced_length() {
        let config = ModelConfig::default();
        let encoder = test_encoder(&ModelConfig::tiny(), 8);
        assert_eq!(encoder.reduced_length(12), 6);
        assert_eq!(encoder.reduced_length(13), 7);
        assert_eq!(config.time_reduction_factor(), 6);
    }

    #[test]
    fn test_streaming_matches_full_pass() {
        // Чанкованный recognize с переносом состояний эквивалентен
        // одному прогону по всей последовательности (чанк кратен редукции)
        let config = ModelConfig::tiny();
        let encoder = test_encoder(&config, 8);
        let device = Device::Cpu;

        let xs = Tensor::randn(0.0_f32, 1.0, (1, 8, 8), &device).unwrap();

        let states = encoder.initial_states(1, &device).unwrap();
        let (full, _) = encoder.recognize(&xs, &states).unwrap();

        let chunk1 = xs.narrow(1, 0, 4).unwrap();
        let chunk2 = xs.narrow(1, 4, 4).unwrap();
        let states = encoder.initial_states(1, &device).unwrap();
        let (out1, states) = encoder.recognize(&chunk1, &states).unwrap();
        let (out2, _) = encoder.recognize(&chunk2, &states).unwrap();
        let chunked = Tensor::cat(&[&out1, &out2], 1).unwrap();

        assert_eq!(full.dims(), chunked.dims());
        let a: Vec<f32> = full.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = chunked.flatten_all().unwrap().to_vec1().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-4, "{x} vs {y}");
        }
    }
}
