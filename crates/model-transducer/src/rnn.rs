//! LSTM-ячейка с явным состоянием.
//!
//! Формулы:
//! gates = x @ W_ih^T + h @ W_hh^T + b_ih + b_hh
//! i, f, g, o = gates.chunk(4)
//! c = sigmoid(f) * c_prev + sigmoid(i) * tanh(g)
//! h = sigmoid(o) * tanh(c)
//!
//! Веса создаются через `get_with_hints`, поэтому один и тот же код
//! инициализирует свежую модель при обучении и загружает safetensors при
//! инференсе.

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{init, ops, VarBuilder};

/// Состояние одного LSTM-слоя: (h, c), оба формы [batch, hidden].
#[derive(Debug, Clone)]
pub struct LstmState {
    pub h: Tensor,
    pub c: Tensor,
}

impl LstmState {
    /// Нулевое начальное состояние.
    pub fn zeros(batch: usize, hidden: usize, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            h: Tensor::zeros((batch, hidden), dtype, device)?,
            c: Tensor::zeros((batch, hidden), dtype, device)?,
        })
    }
}

/// Один LSTM-слой.
#[derive(Debug)]
pub struct LstmCell {
    weight_ih: Tensor, // [4*hidden, input_size]
    weight_hh: Tensor, // [4*hidden, hidden_size]
    bias_ih: Tensor,   // [4*hidden]
    bias_hh: Tensor,   // [4*hidden]
    hidden_size: usize,
}

impl LstmCell {
    /// Создать слой (инициализация или загрузка из VarBuilder).
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let gate_size = 4 * hidden_size;
        let weight_ih = vb.get_with_hints(
            (gate_size, input_size),
            "weight_ih",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let weight_hh = vb.get_with_hints(
            (gate_size, hidden_size),
            "weight_hh",
            init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias_ih = vb.get_with_hints(gate_size, "bias_ih", init::ZERO)?;
        let bias_hh = vb.get_with_hints(gate_size, "bias_hh", init::ZERO)?;
        Ok(Self {
            weight_ih,
            weight_hh,
            bias_ih,
            bias_hh,
            hidden_size,
        })
    }

    /// Размер скрытого состояния.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Нулевое состояние для батча (dtype совпадает с весами).
    pub fn zero_state(&self, batch: usize, device: &Device) -> Result<LstmState> {
        LstmState::zeros(batch, self.hidden_size, self.weight_ih.dtype(), device)
    }

    /// Один шаг: x [batch, input], state → (h_new [batch, hidden], state_new).
    pub fn step(&self, x: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let gates = x
            .matmul(&self.weight_ih.t()?)?
            .broadcast_add(&self.bias_ih)?
            .broadcast_add(&state.h.matmul(&self.weight_hh.t()?)?)?
            .broadcast_add(&self.bias_hh)?;

        let hs = self.hidden_size;

        // Порядок гейтов: input, forget, cell, output
        let i_gate = ops::sigmoid(&gates.narrow(D::Minus1, 0, hs)?)?;
        let f_gate = ops::sigmoid(&gates.narrow(D::Minus1, hs, hs)?)?;
        let g_gate = gates.narrow(D::Minus1, 2 * hs, hs)?.tanh()?;
        let o_gate = ops::sigmoid(&gates.narrow(D::Minus1, 3 * hs, hs)?)?;

        let c_new = ((f_gate * &state.c)? + (i_gate * g_gate)?)?;
        let h_new = (o_gate * c_new.tanh()?)?;

        let state_new = LstmState {
            h: h_new.clone(),
            c: c_new,
        };
        Ok((h_new, state_new))
    }

    /// Прогон последовательности: xs [batch, time, input], state →
    /// (ys [batch, time, hidden], финальное состояние).
    pub fn forward_seq(&self, xs: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let (_b, t, _i) = xs.dims3()?;
        let mut state = state.clone();
        let mut outputs = Vec::with_capacity(t);
        for step in 0..t {
            let x = xs.narrow(1, step, 1)?.squeeze(1)?;
            let (h, new_state) = self.step(&x, &state)?;
            outputs.push(h);
            state = new_state;
        }
        let ys = Tensor::stack(&outputs, 1)?;
        Ok((ys, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::{VarBuilder, VarMap};

    fn test_cell(input: usize, hidden: usize) -> LstmCell {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        LstmCell::new(input, hidden, vb).unwrap()
    }

    #[test]
    fn test_step_shapes() {
        let cell = test_cell(8, 16);
        let device = Device::Cpu;
        let x = Tensor::zeros((2, 8), DType::F32, &device).unwrap();
        let state = cell.zero_state(2, &device).unwrap();

        let (h, new_state) = cell.step(&x, &state).unwrap();
        assert_eq!(h.dims(), &[2, 16]);
        assert_eq!(new_state.h.dims(), &[2, 16]);
        assert_eq!(new_state.c.dims(), &[2, 16]);
    }

    #[test]
    fn test_forward_seq_matches_steps() {
        let cell = test_cell(4, 8);
        let device = Device::Cpu;
        let xs = Tensor::randn(0.0_f32, 1.0, (1, 5, 4), &device).unwrap();
        let state = cell.zero_state(1, &device).unwrap();

        let (ys, final_state) = cell.forward_seq(&xs, &state).unwrap();
        assert_eq!(ys.dims(), &[1, 5, 8]);

        // Пошаговый прогон даёт то же финальное состояние
        let mut state2 = cell.zero_state(1, &device).unwrap();
        for t in 0..5 {
            let x = xs.narrow(1, t, 1).unwrap().squeeze(1).unwrap();
            let (_, s) = cell.step(&x, &state2).unwrap();
            state2 = s;
        }
        let a: Vec<f32> = final_state.h.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = state2.h.flatten_all().unwrap().to_vec1().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_input_zero_state_bounded() {
        // С нулевыми bias и нулевым входом выход ограничен tanh
        let cell = test_cell(4, 8);
        let device = Device::Cpu;
        let x = Tensor::zeros((1, 4), DType::F32, &device).unwrap();
        let state = cell.zero_state(1, &device).unwrap();
        let (h, _) = cell.step(&x, &state).unwrap();
        let values: Vec<f32> = h.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }
}
