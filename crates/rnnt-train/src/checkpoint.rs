//! Менеджер чекпоинтов.
//!
//! Файлы в директории чекпоинтов:
//! - `ckpt-<step>.safetensors` — веса (VarMap);
//! - `latest.json` — номер последнего сохранённого шага;
//! - `config.json` — конфигурация запуска (для восстановления архитектуры
//!   при инференсе).
//!
//! Хранится не больше `max_to_keep` последних чекпоинтов, старые
//! удаляются.

use std::fs;
use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use rnnt_core::{Config, RnntError, RnntResult};
use tracing::{debug, info, warn};

/// Менеджер сохранения и восстановления весов.
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
}

impl CheckpointManager {
    /// Создать менеджер; директория создаётся при необходимости.
    pub fn new(dir: impl AsRef<Path>, max_to_keep: usize) -> RnntResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_to_keep: max_to_keep.max(1),
        })
    }

    /// Путь чекпоинта для шага.
    fn checkpoint_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("ckpt-{step}.safetensors"))
    }

    /// Сохранить веса и обновить `latest.json`; старые чекпоинты
    /// удаляются сверх лимита.
    pub fn save(&self, varmap: &VarMap, step: usize) -> RnntResult<PathBuf> {
        let path = self.checkpoint_path(step);
        varmap.save(&path)?;

        let latest = self.dir.join("latest.json");
        fs::write(&latest, serde_json::to_string(&step)?)?;

        self.prune()?;
        debug!("Чекпоинт сохранён: {:?}", path);
        Ok(path)
    }

    /// Сохранить конфигурацию запуска рядом с чекпоинтами.
    pub fn save_config(&self, config: &Config) -> RnntResult<()> {
        let path = self.dir.join("config.json");
        fs::write(&path, serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Номер последнего сохранённого шага, если есть.
    pub fn latest_step(&self) -> RnntResult<Option<usize>> {
        let latest = self.dir.join("latest.json");
        if !latest.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&latest)?;
        Ok(Some(serde_json::from_str::<usize>(&s)?))
    }

    /// Загрузить последний чекпоинт в существующий VarMap.
    ///
    /// Возвращает номер шага или `None`, если чекпоинтов ещё нет.
    pub fn restore_latest(&self, varmap: &mut VarMap) -> RnntResult<Option<usize>> {
        let Some(step) = self.latest_step()? else {
            return Ok(None);
        };
        let path = self.checkpoint_path(step);
        if !path.exists() {
            return Err(RnntError::Model(format!(
                "latest.json указывает на шаг {step}, но {:?} отсутствует",
                path
            )));
        }
        varmap.load(&path)?;
        info!("Чекпоинт восстановлен: шаг {step} из {:?}", path);
        Ok(Some(step))
    }

    /// Удалить чекпоинты сверх `max_to_keep` (старые по номеру шага).
    fn prune(&self) -> RnntResult<()> {
        let mut steps = self.list_steps()?;
        if steps.len() <= self.max_to_keep {
            return Ok(());
        }
        steps.sort_unstable();
        let excess = steps.len() - self.max_to_keep;
        for &step in &steps[..excess] {
            let path = self.checkpoint_path(step);
            if let Err(e) = fs::remove_file(&path) {
                warn!("Не удалось удалить старый чекпоинт {:?}: {e}", path);
            } else {
                debug!("Старый чекпоинт удалён: {:?}", path);
            }
        }
        Ok(())
    }

    /// Все шаги, для которых есть файлы чекпоинтов.
    fn list_steps(&self) -> RnntResult<Vec<usize>> {
        let mut steps = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(step) = name
                .strip_prefix("ckpt-")
                .and_then(|s| s.strip_suffix(".safetensors"))
                .and_then(|s| s.parse::<usize>().ok())
            {
                steps.push(step);
            }
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    fn varmap_with_var() -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _ = vb
            .get_with_hints((2, 2), "w", candle_nn::init::ZERO)
            .unwrap();
        varmap
    }

    #[test]
    fn test_save_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), 10).unwrap();
        let varmap = varmap_with_var();

        assert_eq!(manager.latest_step().unwrap(), None);
        manager.save(&varmap, 5).unwrap();
        assert_eq!(manager.latest_step().unwrap(), Some(5));
        manager.save(&varmap, 10).unwrap();
        assert_eq!(manager.latest_step().unwrap(), Some(10));
    }

    #[test]
    fn test_retention_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), 2).unwrap();
        let varmap = varmap_with_var();

        for step in [1, 2, 3, 4] {
            manager.save(&varmap, step).unwrap();
        }

        let mut steps = manager.list_steps().unwrap();
        steps.sort_unstable();
        assert_eq!(steps, vec![3, 4]);
    }

    #[test]
    fn test_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), 3).unwrap();

        let varmap = varmap_with_var();
        manager.save(&varmap, 7).unwrap();

        let mut fresh = varmap_with_var();
        let step = manager.restore_latest(&mut fresh).unwrap();
        assert_eq!(step, Some(7));
    }
}
