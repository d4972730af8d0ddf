//! RNN-T loss: forward-алгоритм по решётке (время × метки) в log-пространстве.
//!
//! Рекуррентность:
//! alpha[t][u] = logaddexp(alpha[t-1][u] + blank[t-1][u],
//!                         alpha[t][u-1] + label[t][u-1])
//! loss_b = -(alpha[T_b-1][U_b] + blank[T_b-1][U_b])
//!
//! Всё выражено тензорными операциями candle, поэтому градиент считается
//! автодиффом — отдельного backward для решётки не нужно.

use candle_core::{IndexOp, Result, Tensor, D};
use candle_nn::ops::log_softmax;

/// logaddexp для тензоров одинаковой формы.
fn log_add_exp(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let m = a.maximum(b)?;
    let sum = ((a - &m)?.exp()? + (b - &m)?.exp()?)?;
    m + sum.log()?
}

/// Срез [B] из тензора [B, T, U] по (t, u).
fn cell(lp: &Tensor, t: usize, u: usize) -> Result<Tensor> {
    lp.narrow(1, t, 1)?.narrow(2, u, 1)?.squeeze(2)?.squeeze(1)
}

/// RNN-T loss, усреднённый по батчу.
///
/// * `logits` — [B, T, U+1, V], выход joint-сети по всей решётке.
/// * `targets` — [B, U], метки без blank (u32), паддинг любым значением
///   за пределами `target_lengths`.
/// * `logit_lengths` — длины выходов энкодера (<= T).
/// * `target_lengths` — длины последовательностей меток (<= U).
pub fn rnnt_loss(
    logits: &Tensor,
    targets: &Tensor,
    logit_lengths: &[usize],
    target_lengths: &[usize],
    blank: u32,
) -> Result<Tensor> {
    let (b, t_max, u1, _v) = logits.dims4()?;
    let u_max = u1 - 1;

    if logit_lengths.len() != b || target_lengths.len() != b {
        candle_core::bail!(
            "rnnt_loss: lengths ({}, {}) do not match batch {b}",
            logit_lengths.len(),
            target_lengths.len()
        );
    }
    for (i, &len) in logit_lengths.iter().enumerate() {
        if len == 0 || len > t_max {
            candle_core::bail!("rnnt_loss: bad logit length {len} at {i} (T={t_max})");
        }
    }
    for (i, &len) in target_lengths.iter().enumerate() {
        if len > u_max {
            candle_core::bail!("rnnt_loss: bad target length {len} at {i} (U={u_max})");
        }
    }

    // DP считается в F32 независимо от dtype модели
    let log_probs = log_softmax(logits, D::Minus1)?.to_dtype(candle_core::DType::F32)?;

    // Вероятности blank: [B, T, U+1]
    let blank_lp = log_probs
        .narrow(D::Minus1, blank as usize, 1)?
        .squeeze(D::Minus1)?;

    // Вероятности меток: [B, T, U]; label[t][u] = lp[t, u, target[u]]
    let label_lp = if u_max > 0 {
        let src = log_probs.narrow(2, 0, u_max)?.contiguous()?; // [B, T, U, V]
        let index = targets
            .unsqueeze(1)?
            .unsqueeze(3)?
            .broadcast_as((b, t_max, u_max, 1))?
            .contiguous()?;
        Some(src.gather(&index, 3)?.squeeze(3)?)
    } else {
        None
    };

    let label = |t: usize, u: usize| -> Result<Tensor> {
        match &label_lp {
            Some(lp) => cell(lp, t, u),
            // Недостижимо: label вызывается только при u_max > 0
            None => candle_core::bail!("label transition with empty targets"),
        }
    };

    let device = logits.device();
    let mut losses: Vec<Option<Tensor>> = vec![None; b];

    // Строка t = 0: только горизонтальные (label) переходы
    let mut alpha: Vec<Tensor> =
        vec![Tensor::zeros(b, candle_core::DType::F32, device)?];
    for u in 1..=u_max {
        let prev = &alpha[u - 1];
        alpha.push((prev + label(0, u - 1)?)?);
    }

    let collect_terminals = |alpha: &[Tensor], t: usize, losses: &mut Vec<Option<Tensor>>| -> Result<()> {
        for i in 0..b {
            if logit_lengths[i] - 1 == t {
                let u = target_lengths[i];
                let terminal = (alpha[u].i(i)? + cell(&blank_lp, t, u)?.i(i)?)?;
                losses[i] = Some(terminal);
            }
        }
        Ok(())
    };

    collect_terminals(&alpha, 0, &mut losses)?;

    for t in 1..t_max {
        let mut next: Vec<Tensor> = Vec::with_capacity(u_max + 1);
        next.push((&alpha[0] + cell(&blank_lp, t - 1, 0)?)?);
        for u in 1..=u_max {
            let stay = (&alpha[u] + cell(&blank_lp, t - 1, u)?)?;
            let advance = (&next[u - 1] + label(t, u - 1)?)?;
            next.push(log_add_exp(&stay, &advance)?);
        }
        alpha = next;
        collect_terminals(&alpha, t, &mut losses)?;
    }

    let losses: Vec<Tensor> = losses
        .into_iter()
        .enumerate()
        .map(|(i, l)| {
            l.ok_or_else(|| {
                candle_core::Error::Msg(format!("rnnt_loss: no terminal for sample {i}"))
            })
        })
        .collect::<Result<_>>()?;

    // Средний negative log-likelihood
    Tensor::stack(&losses, 0)?.mean(0)?.neg()
}
