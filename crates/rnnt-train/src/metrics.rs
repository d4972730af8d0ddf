//! Метрики качества (WER/CER) и CSV-лог эпох.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rnnt_core::RnntResult;
use tracing::debug;

/// Расстояние Левенштейна между двумя последовательностями.
pub fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ai) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, bj) in b.iter().enumerate() {
            let cost = if ai == bj { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Word Error Rate одной пары (гипотеза, эталон).
pub fn wer(hypothesis: &str, reference: &str) -> f64 {
    let hyp: Vec<&str> = hypothesis.split_whitespace().collect();
    let refr: Vec<&str> = reference.split_whitespace().collect();
    if refr.is_empty() {
        return if hyp.is_empty() { 0.0 } else { 1.0 };
    }
    edit_distance(&hyp, &refr) as f64 / refr.len() as f64
}

/// Character Error Rate одной пары (гипотеза, эталон).
pub fn cer(hypothesis: &str, reference: &str) -> f64 {
    let hyp: Vec<char> = hypothesis.chars().collect();
    let refr: Vec<char> = reference.chars().collect();
    if refr.is_empty() {
        return if hyp.is_empty() { 0.0 } else { 1.0 };
    }
    edit_distance(&hyp, &refr) as f64 / refr.len() as f64
}

/// Метрики одной эпохи.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub eval_loss: f64,
    pub wer: f64,
    pub cer: f64,
}

/// CSV-лог метрик по эпохам: `checkpoints/metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Создать лог; заголовок пишется только для нового файла, дозапись
    /// продолжает существующий лог между запусками.
    pub fn new(dir: impl AsRef<Path>) -> RnntResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,eval_loss,wer,cer")?;
        }

        Ok(Self { csv_path })
    }

    /// Дописать строку метрик.
    pub fn log(&self, m: &EpochMetrics) -> RnntResult<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6}",
            m.epoch, m.train_loss, m.eval_loss, m.wer, m.cer
        )?;
        debug!(
            "metrics: epoch={} train_loss={:.4} eval_loss={:.4} wer={:.3}",
            m.epoch, m.train_loss, m.eval_loss, m.wer
        );
        Ok(())
    }

    /// Путь к CSV-файлу.
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
