//! Periodic checkpoint files with rotation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};

use crate::error::{EvoError, Result};
use crate::schema::CheckpointConfig;

use super::format::{Checkpoint, CheckpointEncoding, CheckpointInfo};

const FILE_PREFIX: &str = "checkpoint_";

/// Writes `checkpoint_{generation:08}.evck` (or `.json`) files into a
/// directory and keeps the newest `max_checkpoints` of them.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    config: CheckpointConfig,
}

impl CheckpointManager {
    /// Creates the checkpoint directory when checkpointing is enabled.
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        if config.enabled {
            fs::create_dir_all(&config.directory).map_err(EvoError::FileWrite)?;
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn encoding(&self) -> CheckpointEncoding {
        if self.config.json {
            CheckpointEncoding::Json
        } else {
            CheckpointEncoding::Binary
        }
    }

    /// True when `generation` falls on the save interval.
    pub fn is_due(&self, generation: u64) -> bool {
        self.config.enabled
            && self.config.interval > 0
            && generation > 0
            && generation % self.config.interval == 0
    }

    pub fn path_for(&self, generation: u64) -> PathBuf {
        self.config.directory.join(format!(
            "{}{:08}.{}",
            FILE_PREFIX,
            generation,
            self.encoding().extension()
        ))
    }

    /// Write `checkpoint`, then delete the oldest files beyond the limit.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.directory).map_err(EvoError::FileWrite)?;
        let path = self.path_for(checkpoint.generation);
        let partial = path.with_extension("partial");
        checkpoint.save(&partial, self.encoding())?;
        fs::rename(&partial, &path).map_err(EvoError::FileWrite)?;
        info!(
            "Checkpoint saved at generation {} to {}",
            checkpoint.generation,
            path.display()
        );

        let removed = self.prune()?;
        if removed > 0 {
            debug!("Removed {} old checkpoints", removed);
        }
        Ok(path)
    }

    /// Checkpoint files in the directory, newest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.config.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EvoError::FileRead(e)),
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(EvoError::FileRead)?;
            let path = entry.path();
            if !is_checkpoint_file(&path) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }

        // Files written within the same mtime tick fall back to name order,
        // which is generation order.
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        self.latest()?.map(Checkpoint::load).transpose()
    }

    /// Summary of the checkpoint at `path`.
    pub fn info(&self, path: impl AsRef<Path>) -> Result<CheckpointInfo> {
        Ok(Checkpoint::load(path)?.info())
    }

    /// Delete all but the newest `max_checkpoints` files. Returns how many
    /// were removed.
    pub fn prune(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.list()?.into_iter().skip(self.config.max_checkpoints) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

fn is_checkpoint_file(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(FILE_PREFIX));
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            e == CheckpointEncoding::Binary.extension() || e == CheckpointEncoding::Json.extension()
        });
    name_ok && ext_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{Genome, Population};

    fn manager(dir: &Path, max: usize, json: bool) -> CheckpointManager {
        CheckpointManager::new(CheckpointConfig {
            enabled: true,
            interval: 5,
            directory: dir.to_path_buf(),
            max_checkpoints: max,
            json,
        })
        .unwrap()
    }

    fn checkpoint(generation: u64) -> Checkpoint {
        let mut population = Population::new(4).unwrap();
        population
            .add(&Genome::from_vec(vec![1, 2, 3]).unwrap(), generation as f64)
            .unwrap();
        population.set_generation(generation);
        population.update_stats();
        Checkpoint::capture(&population, "needle")
    }

    #[test]
    fn test_interval() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 3, false);
        assert!(!m.is_due(0));
        assert!(!m.is_due(4));
        assert!(m.is_due(5));
        assert!(m.is_due(10));
        assert_eq!(
            m.path_for(10).file_name().unwrap().to_str().unwrap(),
            "checkpoint_00000010.evck"
        );
    }

    #[test]
    fn test_rotation_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 2, false);
        for generation in [5, 10, 15, 20] {
            m.save(&checkpoint(generation)).unwrap();
        }
        let files = m.list().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], m.path_for(20));
        assert_eq!(files[1], m.path_for(15));

        let latest = m.load_latest().unwrap().unwrap();
        assert_eq!(latest.generation, 20);
        assert_eq!(m.info(&files[1]).unwrap().best_fitness, 15.0);
    }

    #[test]
    fn test_json_files_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 5, true);
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        let path = m.save(&checkpoint(5)).unwrap();
        assert_eq!(path.extension().unwrap(), "json");
        assert_eq!(m.list().unwrap(), vec![path]);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let m = CheckpointManager::new(CheckpointConfig {
            directory: dir.path().join("absent"),
            ..Default::default()
        })
        .unwrap();
        assert!(m.list().unwrap().is_empty());
        assert!(m.latest().unwrap().is_none());
    }
}
