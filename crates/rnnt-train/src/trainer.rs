//! Цикл обучения трансдьюсера.
//!
//! Эпоха: перемешивание → батчи → RNN-T loss → AdamW. После каждой эпохи:
//! валидационный loss, жадный WER/CER на ограниченном числе батчей,
//! строка в metrics.csv и чекпоинт с ротацией.

use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use tracing::{info, warn};

use model_transducer::StreamingTransducer;
use rnnt_core::{CharFeaturizer, Config, RnntError, RnntResult};

use crate::batcher::make_batch;
use crate::checkpoint::CheckpointManager;
use crate::dataset::{read_transcript_lists, AsrDataset};
use crate::metrics::{edit_distance, EpochMetrics, MetricsLogger};

/// Переопределения из командной строки.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Сколько чекпоинтов хранить.
    pub max_ckpts: usize,

    /// Размер батча обучения (если задан, перекрывает конфиг).
    pub train_batch_size: Option<usize>,

    /// Размер батча валидации (если задан, перекрывает конфиг).
    pub eval_batch_size: Option<usize>,

    /// Кэшировать признаки датасета в памяти.
    pub cache: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            max_ckpts: 10,
            train_batch_size: None,
            eval_batch_size: None,
            cache: false,
        }
    }
}

/// Тренер стримингового трансдьюсера.
pub struct TransducerTrainer {
    config: Config,
    device: Device,
    dtype: DType,
}

impl TransducerTrainer {
    /// Создать тренер.
    pub fn new(config: Config, device: Device, dtype: DType) -> Self {
        Self {
            config,
            device,
            dtype,
        }
    }

    /// Полный цикл обучения.
    pub fn train(&self, options: &TrainOptions) -> RnntResult<()> {
        let running = &self.config.learning.running;
        let text = CharFeaturizer::from_config(&self.config.text)?;

        // --- Датасеты -----------------------------------------------------
        let train_entries =
            read_transcript_lists(&self.config.learning.dataset.train_paths)?;
        if train_entries.is_empty() {
            return Err(RnntError::Dataset(
                "Обучающий датасет пуст: проверьте learning.dataset.train_paths".into(),
            ));
        }
        let eval_entries = read_transcript_lists(&self.config.learning.dataset.eval_paths)?;

        let mut train_dataset = AsrDataset::new(
            train_entries,
            &self.config.speech,
            text.clone(),
            options.cache,
        );
        let mut eval_dataset = AsrDataset::new(
            eval_entries,
            &self.config.speech,
            text.clone(),
            options.cache,
        );

        let train_bs = options.train_batch_size.unwrap_or(running.batch_size).max(1);
        let eval_bs = options
            .eval_batch_size
            .unwrap_or(running.eval_batch_size)
            .max(1);

        info!(
            "Обучение: {} utterance ({:.1} мин), валидация: {} utterance, батчи {}/{}",
            train_dataset.len(),
            train_dataset.total_duration_secs() / 60.0,
            eval_dataset.len(),
            train_bs,
            eval_bs
        );

        // --- Модель и оптимизатор ----------------------------------------
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, self.dtype, &self.device);
        let model = StreamingTransducer::new(
            &self.config.model,
            self.config.speech.num_feature_bins,
            text.num_classes(),
            vb,
        )?;

        let manager =
            CheckpointManager::new(&running.checkpoint_dir, options.max_ckpts)?;
        manager.save_config(&self.config)?;
        let mut global_step = manager.restore_latest(&mut varmap)?.unwrap_or(0);

        let opt_cfg = &self.config.learning.optimizer;
        let params = ParamsAdamW {
            lr: opt_cfg.learning_rate,
            beta1: opt_cfg.beta1,
            beta2: opt_cfg.beta2,
            eps: opt_cfg.epsilon,
            weight_decay: opt_cfg.weight_decay,
        };
        let mut optimizer = AdamW::new(varmap.all_vars(), params)?;

        let logger = MetricsLogger::new(&running.checkpoint_dir)?;

        // --- Эпохи --------------------------------------------------------
        for epoch in 1..=running.num_epochs {
            train_dataset.shuffle();

            let mut loss_sum = 0.0f64;
            let mut num_batches = 0usize;

            let mut start = 0;
            while start < train_dataset.len() {
                let end = (start + train_bs).min(train_dataset.len());
                let Some(batch) =
                    self.collect_batch(&mut train_dataset, start..end)?
                else {
                    start = end;
                    continue;
                };
                start = end;

                let loss = model.compute_loss(
                    &batch.features,
                    &batch.pred_inputs,
                    &batch.targets,
                    &batch.feature_lengths,
                    &batch.target_lengths,
                    true,
                )?;
                optimizer.backward_step(&loss)?;

                let loss_val = loss.to_scalar::<f32>()? as f64;
                loss_sum += loss_val;
                num_batches += 1;
                global_step += 1;

                if global_step % running.log_every_n_steps == 0 {
                    info!(
                        "эпоха {epoch} шаг {global_step}: loss={:.4}",
                        loss_val
                    );
                }
            }

            let train_loss = if num_batches > 0 {
                loss_sum / num_batches as f64
            } else {
                f64::NAN
            };

            // --- Валидация ------------------------------------------------
            let (eval_loss, wer, cer) =
                self.evaluate(&model, &mut eval_dataset, eval_bs, &text)?;

            info!(
                "эпоха {epoch}/{}: train_loss={:.4} eval_loss={:.4} wer={:.3} cer={:.3}",
                running.num_epochs, train_loss, eval_loss, wer, cer
            );

            logger.log(&EpochMetrics {
                epoch,
                train_loss,
                eval_loss,
                wer,
                cer,
            })?;
            manager.save(&varmap, global_step)?;
        }

        info!("Обучение завершено: {} шагов", global_step);
        Ok(())
    }

    /// Собрать батч, пропуская битые utterance с предупреждением.
    fn collect_batch(
        &self,
        dataset: &mut AsrDataset,
        range: std::ops::Range<usize>,
    ) -> RnntResult<Option<crate::batcher::Batch>> {
        let mut items = Vec::with_capacity(range.len());
        for idx in range {
            match dataset.get(idx, &self.device) {
                Ok(item) => items.push(item),
                Err(e) => warn!("utterance {idx} пропущен: {e}"),
            }
        }
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(make_batch(&items, &self.device)?))
    }

    /// Валидация: средний loss по всем батчам + WER/CER на первых
    /// `wer_eval_batches` батчах (жадное декодирование).
    fn evaluate(
        &self,
        model: &StreamingTransducer,
        dataset: &mut AsrDataset,
        batch_size: usize,
        text: &CharFeaturizer,
    ) -> RnntResult<(f64, f64, f64)> {
        if dataset.is_empty() {
            return Ok((f64::NAN, f64::NAN, f64::NAN));
        }

        let wer_batches = self.config.learning.running.wer_eval_batches;

        let mut loss_sum = 0.0f64;
        let mut num_batches = 0usize;
        let mut word_errors = 0usize;
        let mut word_total = 0usize;
        let mut char_errors = 0usize;
        let mut char_total = 0usize;

        let mut start = 0;
        while start < dataset.len() {
            let end = (start + batch_size).min(dataset.len());
            let range = start..end;
            start = end;

            let mut items = Vec::with_capacity(range.len());
            for idx in range {
                match dataset.get(idx, &self.device) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!("eval utterance {idx} пропущен: {e}"),
                }
            }
            if items.is_empty() {
                continue;
            }

            let batch = make_batch(&items, &self.device)?;
            let loss = model.compute_loss(
                &batch.features,
                &batch.pred_inputs,
                &batch.targets,
                &batch.feature_lengths,
                &batch.target_lengths,
                false,
            )?;
            loss_sum += loss.to_scalar::<f32>()? as f64;
            num_batches += 1;

            // Жадное декодирование дорогое — только первые батчи
            if num_batches <= wer_batches {
                for (features, ref_tokens) in &items {
                    let hyp_tokens = model.recognize(features)?;
                    let hyp = text.iextract(&hyp_tokens);
                    let reference = text.iextract(ref_tokens);

                    let hyp_words: Vec<&str> = hyp.split_whitespace().collect();
                    let ref_words: Vec<&str> = reference.split_whitespace().collect();
                    word_errors += edit_distance(&hyp_words, &ref_words);
                    word_total += ref_words.len();

                    let hyp_chars: Vec<char> = hyp.chars().collect();
                    let ref_chars: Vec<char> = reference.chars().collect();
                    char_errors += edit_distance(&hyp_chars, &ref_chars);
                    char_total += ref_chars.len();
                }
            }
        }

        let eval_loss = if num_batches > 0 {
            loss_sum / num_batches as f64
        } else {
            f64::NAN
        };
        let wer = if word_total > 0 {
            word_errors as f64 / word_total as f64
        } else {
            f64::NAN
        };
        let cer = if char_total > 0 {
            char_errors as f64 / char_total as f64
        } else {
            f64::NAN
        };

        Ok((eval_loss, wer, cer))
    }
}
