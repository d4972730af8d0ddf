//! Символьный текстовый словарь (char featurizer).
//!
//! Blank-токен всегда имеет индекс 0 — декодеры полагаются на это при
//! инициализации и при отбрасывании blank в `iextract`.

use std::collections::HashMap;
use std::path::Path;

use crate::config::TextConfig;
use crate::error::{RnntError, RnntResult};

/// Индекс blank-токена.
pub const BLANK: u32 = 0;

/// Символьный словарь: текст → индексы и обратно.
#[derive(Debug, Clone)]
pub struct CharFeaturizer {
    vocab: Vec<char>,
    index: HashMap<char, u32>,
}

impl CharFeaturizer {
    /// Построить словарь из конфигурации.
    ///
    /// Без файла словаря используется английский алфавит по умолчанию.
    pub fn from_config(config: &TextConfig) -> RnntResult<Self> {
        match &config.vocabulary {
            Some(path) => Self::from_file(path),
            None => Ok(Self::english()),
        }
    }

    /// Английский словарь по умолчанию: пробел, a-z, апостроф.
    pub fn english() -> Self {
        let mut chars = vec![' '];
        chars.extend('a'..='z');
        chars.push('\'');
        Self::from_chars(chars)
    }

    /// Загрузить словарь из файла: один символ на строку, `#` — комментарий.
    pub fn from_file(path: impl AsRef<Path>) -> RnntResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            RnntError::Config(format!("Не удалось прочитать словарь {:?}: {e}", path))
        })?;

        let mut chars = Vec::new();
        for line in data.lines() {
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            let mut it = line.chars();
            let c = it.next().ok_or_else(|| {
                RnntError::Config(format!("Пустая строка словаря в {:?}", path))
            })?;
            chars.push(c);
        }
        if chars.is_empty() {
            return Err(RnntError::Config(format!("Словарь {:?} пуст", path)));
        }
        Ok(Self::from_chars(chars))
    }

    /// Построить словарь из списка символов (blank добавляется на позицию 0).
    fn from_chars(chars: Vec<char>) -> Self {
        let mut index = HashMap::with_capacity(chars.len());
        for (i, &c) in chars.iter().enumerate() {
            // Индекс 0 зарезервирован под blank.
            index.insert(c, (i + 1) as u32);
        }
        Self { vocab: chars, index }
    }

    /// Количество классов, включая blank.
    pub fn num_classes(&self) -> usize {
        self.vocab.len() + 1
    }

    /// Индекс blank-токена.
    pub fn blank(&self) -> u32 {
        BLANK
    }

    /// Текст → индексы. Символы вне словаря пропускаются.
    pub fn extract(&self, text: &str) -> Vec<u32> {
        text.to_lowercase()
            .chars()
            .filter_map(|c| self.index.get(&c).copied())
            .collect()
    }

    /// Индексы → текст. Blank-токены отбрасываются.
    pub fn iextract(&self, indices: &[u32]) -> String {
        indices
            .iter()
            .filter(|&&i| i != BLANK)
            .filter_map(|&i| self.vocab.get(i as usize - 1))
            .collect()
    }

    /// Префикс blank для входа предсказательной сети при обучении.
    pub fn prepend_blank(&self, indices: &[u32]) -> Vec<u32> {
        let mut out = Vec::with_capacity(indices.len() + 1);
        out.push(BLANK);
        out.extend_from_slice(indices);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_at_zero() {
        let f = CharFeaturizer::english();
        assert_eq!(f.blank(), 0);
        // 28 символов + blank
        assert_eq!(f.num_classes(), 29);
    }

    #[test]
    fn test_extract_iextract_roundtrip() {
        let f = CharFeaturizer::english();
        let ids = f.extract("hello world");
        assert_eq!(ids.len(), 11);
        assert_eq!(f.iextract(&ids), "hello world");
    }

    #[test]
    fn test_extract_skips_unknown() {
        let f = CharFeaturizer::english();
        let ids = f.extract("a,b!");
        assert_eq!(f.iextract(&ids), "ab");
    }

    #[test]
    fn test_extract_lowercases() {
        let f = CharFeaturizer::english();
        assert_eq!(f.extract("ABC"), f.extract("abc"));
    }

    #[test]
    fn test_prepend_blank() {
        let f = CharFeaturizer::english();
        let ids = f.extract("hi");
        let pred = f.prepend_blank(&ids);
        assert_eq!(pred.len(), 3);
        assert_eq!(pred[0], BLANK);
        assert_eq!(&pred[1..], &ids[..]);
    }

    #[test]
    fn test_iextract_drops_blank() {
        let f = CharFeaturizer::english();
        let mut ids = f.extract("ok");
        ids.insert(1, BLANK);
        assert_eq!(f.iextract(&ids), "ok");
    }
}
