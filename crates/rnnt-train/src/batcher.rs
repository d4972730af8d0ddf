//! Сборка батчей с паддингом.
//!
//! Признаки дополняются нулями до максимальной длины батча, метки —
//! blank'ом. Вход предсказательной сети — метки с префиксом blank
//! (на один шаг длиннее).

use candle_core::{DType, Device, Tensor};
use rnnt_core::{RnntError, RnntResult, BLANK};

/// Батч для обучения.
pub struct Batch {
    /// Признаки [B, T_max, F].
    pub features: Tensor,

    /// Длины признаков в фреймах (до паддинга).
    pub feature_lengths: Vec<usize>,

    /// Вход предсказательной сети [B, U_max + 1]: blank + метки.
    pub pred_inputs: Tensor,

    /// Метки [B, U_max], паддинг blank'ом.
    pub targets: Tensor,

    /// Длины меток (до паддинга).
    pub target_lengths: Vec<usize>,
}

impl Batch {
    /// Размер батча.
    pub fn batch_size(&self) -> usize {
        self.feature_lengths.len()
    }
}

/// Собрать батч из элементов датасета (признаки [T, F], токены).
pub fn make_batch(items: &[(Tensor, Vec<u32>)], device: &Device) -> RnntResult<Batch> {
    if items.is_empty() {
        return Err(RnntError::Dataset("Пустой батч".into()));
    }

    let num_bins = items[0].0.dim(1)?;
    let t_max = items
        .iter()
        .map(|(f, _)| f.dim(0))
        .collect::<candle_core::Result<Vec<_>>>()?
        .into_iter()
        .max()
        .unwrap_or(0);
    if t_max == 0 {
        return Err(RnntError::Dataset("Батч без фреймов".into()));
    }
    let u_max = items.iter().map(|(_, t)| t.len()).max().unwrap_or(0);

    let mut feature_rows = Vec::with_capacity(items.len());
    let mut feature_lengths = Vec::with_capacity(items.len());
    let mut target_flat: Vec<u32> = Vec::with_capacity(items.len() * u_max);
    let mut pred_flat: Vec<u32> = Vec::with_capacity(items.len() * (u_max + 1));
    let mut target_lengths = Vec::with_capacity(items.len());

    for (features, tokens) in items {
        let t = features.dim(0)?;
        if features.dim(1)? != num_bins {
            return Err(RnntError::Dataset(format!(
                "Несогласованное число признаков в батче: {} vs {}",
                features.dim(1)?,
                num_bins
            )));
        }
        let padded = if t < t_max {
            features.pad_with_zeros(0, 0, t_max - t)?
        } else {
            features.clone()
        };
        feature_rows.push(padded);
        feature_lengths.push(t);

        pred_flat.push(BLANK);
        for u in 0..u_max {
            let token = tokens.get(u).copied().unwrap_or(BLANK);
            target_flat.push(token);
            pred_flat.push(token);
        }
        target_lengths.push(tokens.len());
    }

    let features = Tensor::stack(&feature_rows, 0)?;
    let targets = Tensor::from_vec(target_flat, (items.len(), u_max), device)?;
    let pred_inputs = Tensor::from_vec(pred_flat, (items.len(), u_max + 1), device)?;

    // Страховка от смешения типов при сборке из векторов
    debug_assert_eq!(targets.dtype(), DType::U32);

    Ok(Batch {
        features,
        feature_lengths,
        pred_inputs,
        targets,
        target_lengths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn item(t: usize, tokens: Vec<u32>, device: &Device) -> (Tensor, Vec<u32>) {
        (
            Tensor::randn(0.0_f32, 1.0, (t, 4), device).unwrap(),
            tokens,
        )
    }

    #[test]
    fn test_batch_shapes() {
        let device = Device::Cpu;
        let items = vec![
            item(10, vec![1, 2, 3], &device),
            item(6, vec![4], &device),
        ];
        let batch = make_batch(&items, &device).unwrap();

        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.features.dims(), &[2, 10, 4]);
        assert_eq!(batch.targets.dims(), &[2, 3]);
        assert_eq!(batch.pred_inputs.dims(), &[2, 4]);
        assert_eq!(batch.feature_lengths, vec![10, 6]);
        assert_eq!(batch.target_lengths, vec![3, 1]);
    }

    #[test]
    fn test_pred_inputs_blank_prefixed() {
        let device = Device::Cpu;
        let items = vec![item(4, vec![5, 6], &device)];
        let batch = make_batch(&items, &device).unwrap();

        let pred: Vec<u32> = batch.pred_inputs.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(pred, vec![0, 5, 6]);
    }

    #[test]
    fn test_padding_is_zero() {
        let device = Device::Cpu;
        let items = vec![item(2, vec![1], &device), item(5, vec![2], &device)];
        let batch = make_batch(&items, &device).unwrap();

        // Хвост первого элемента — нули
        let tail: Vec<f32> = batch
            .features
            .narrow(0, 0, 1)
            .unwrap()
            .narrow(1, 2, 3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(tail.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let device = Device::Cpu;
        assert!(make_batch(&[], &device).is_err());
    }
}
