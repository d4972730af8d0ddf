//! Датасет из списков транскрипций.
//!
//! Формат списка (по строке на utterance, первая строка-заголовок
//! пропускается):
//!
//! ```text
//! PATH\tDURATION\tTRANSCRIPT
//! clips/a001.wav\t2.15\thello world
//! ```
//!
//! Каждый элемент: WAV → mono → ресемплинг → log-mel признаки + токены
//! транскрипции. `cache=true` держит готовые признаки в памяти после
//! первого прохода.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use audio::{load_wav, to_mono, FeatureExtractor, Resampler};
use rnnt_core::{CharFeaturizer, RnntError, RnntResult, SpeechConfig};

/// Одна строка списка транскрипций.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    /// Путь к аудио-файлу.
    pub audio_path: PathBuf,

    /// Длительность в секундах (из списка, для статистики).
    pub duration_secs: f64,

    /// Текст транскрипции.
    pub transcript: String,
}

/// Прочитать списки транскрипций.
///
/// Относительные пути к аудио разрешаются от директории списка.
pub fn read_transcript_lists(paths: &[PathBuf]) -> RnntResult<Vec<TranscriptEntry>> {
    let mut entries = Vec::new();
    for list_path in paths {
        let data = std::fs::read_to_string(list_path).map_err(|e| {
            RnntError::Dataset(format!("Не удалось прочитать список {:?}: {e}", list_path))
        })?;
        let base = list_path.parent().unwrap_or(Path::new("."));

        for (lineno, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("PATH") {
                continue;
            }
            let mut fields = line.split('\t');
            let (path, duration, transcript) =
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(p), Some(d), Some(t)) => (p, d, t),
                    _ => {
                        return Err(RnntError::Dataset(format!(
                            "{:?}:{}: ожидается PATH\\tDURATION\\tTRANSCRIPT",
                            list_path,
                            lineno + 1
                        )))
                    }
                };
            let duration_secs = duration.parse::<f64>().map_err(|e| {
                RnntError::Dataset(format!(
                    "{:?}:{}: некорректная длительность {duration:?}: {e}",
                    list_path,
                    lineno + 1
                ))
            })?;

            let audio_path = {
                let p = Path::new(path);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    base.join(p)
                }
            };

            entries.push(TranscriptEntry {
                audio_path,
                duration_secs,
                transcript: transcript.to_string(),
            });
        }
    }
    info!("Списки транскрипций: {} utterance", entries.len());
    Ok(entries)
}

/// Датасет: список транскрипций + извлечение признаков.
pub struct AsrDataset {
    entries: Vec<TranscriptEntry>,
    extractor: FeatureExtractor,
    resampler: Resampler,
    text: CharFeaturizer,
    cache: Option<HashMap<usize, (Tensor, Vec<u32>)>>,
}

impl AsrDataset {
    /// Создать датасет.
    pub fn new(
        entries: Vec<TranscriptEntry>,
        speech: &SpeechConfig,
        text: CharFeaturizer,
        cache: bool,
    ) -> Self {
        Self {
            entries,
            extractor: FeatureExtractor::new(speech),
            resampler: Resampler::new(speech.sample_rate),
            text,
            cache: cache.then(HashMap::new),
        }
    }

    /// Количество utterance.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Датасет пуст?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Суммарная длительность по спискам, в секундах.
    pub fn total_duration_secs(&self) -> f64 {
        self.entries.iter().map(|e| e.duration_secs).sum()
    }

    /// Перемешать порядок utterance (вызывается раз в эпоху).
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        // Кэш ключуется по индексу исходного списка, поэтому вместе с
        // entries перемешивать его нельзя — сбрасываем ключи через
        // перестановку индексов
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.shuffle(&mut rng);

        let mut entries = Vec::with_capacity(self.entries.len());
        let mut cache = self.cache.as_ref().map(|_| HashMap::new());
        for (new_idx, &old_idx) in order.iter().enumerate() {
            entries.push(self.entries[old_idx].clone());
            if let (Some(new_cache), Some(old_cache)) = (cache.as_mut(), self.cache.as_mut()) {
                if let Some(item) = old_cache.remove(&old_idx) {
                    new_cache.insert(new_idx, item);
                }
            }
        }
        self.entries = entries;
        if let Some(new_cache) = cache {
            self.cache = Some(new_cache);
        }
    }

    /// Получить элемент: (признаки [T, F], токены транскрипции).
    pub fn get(&mut self, idx: usize, device: &Device) -> RnntResult<(Tensor, Vec<u32>)> {
        if let Some(cache) = &self.cache {
            if let Some((features, tokens)) = cache.get(&idx) {
                return Ok((features.clone(), tokens.clone()));
            }
        }

        let entry = self
            .entries
            .get(idx)
            .ok_or_else(|| RnntError::Dataset(format!("Индекс {idx} вне датасета")))?
            .clone();

        let buffer = load_wav(&entry.audio_path)?;
        let mono = to_mono(&buffer);
        let resampled = self.resampler.resample(&mono)?;
        let features = self.extractor.extract(&resampled.samples, device)?;

        if features.num_frames == 0 {
            return Err(RnntError::Dataset(format!(
                "{:?}: аудио короче одного окна анализа",
                entry.audio_path
            )));
        }

        let tokens = self.text.extract(&entry.transcript);
        if tokens.is_empty() {
            warn!("{:?}: пустая транскрипция после словаря", entry.audio_path);
        }

        debug!(
            "dataset[{idx}]: {:?} → {} фреймов, {} токенов",
            entry.audio_path,
            features.num_frames,
            tokens.len()
        );

        let item = (features.tensor, tokens);
        if let Some(cache) = &mut self.cache {
            cache.insert(idx, item.clone());
        }
        Ok(item)
    }

    /// Текстовый словарь датасета.
    pub fn text_featurizer(&self) -> &CharFeaturizer {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_transcript_list() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("train.tsv");
        let mut f = std::fs::File::create(&list).unwrap();
        writeln!(f, "PATH\tDURATION\tTRANSCRIPT").unwrap();
        writeln!(f, "clips/a.wav\t1.5\thello").unwrap();
        writeln!(f, "/abs/b.wav\t2.0\tworld").unwrap();

        let entries = read_transcript_lists(&[list]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].audio_path, dir.path().join("clips/a.wav"));
        assert_eq!(entries[0].transcript, "hello");
        assert!((entries[0].duration_secs - 1.5).abs() < 1e-9);
        assert_eq!(entries[1].audio_path, PathBuf::from("/abs/b.wav"));
    }

    #[test]
    fn test_read_transcript_list_rejects_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("bad.tsv");
        std::fs::write(&list, "only_one_field\n").unwrap();
        assert!(read_transcript_lists(&[list]).is_err());

        let list = dir.path().join("bad2.tsv");
        std::fs::write(&list, "a.wav\tnot_a_number\thi\n").unwrap();
        assert!(read_transcript_lists(&[list]).is_err());
    }
}
