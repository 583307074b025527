use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::instance::{Instance, file_stem_for, format_datetime};
use crate::Example;

/// Base directory, relative to the home directory, when none is given.
pub const DEFAULT_DATA_DIR: &str = ".metrics_data";

/// Record counts for one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub labeled: usize,
    pub unlabeled: usize,
}

/// File-per-record JSON store for one metric's instances.
///
/// Records live in `<base>/<metric_name>/<timestamp>.json`. The `datetime`
/// field is the record's identity: no two records in a store share one.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    metric_name: String,
    data_dir: PathBuf,
}

impl InstanceStore {
    /// Opens the store under `~/.metrics_data/<metric_name>`.
    pub fn new(metric_name: impl Into<String>) -> Result<Self> {
        Self::with_base_dir(metric_name, DEFAULT_DATA_DIR)
    }

    /// Opens the store under `<base>/<metric_name>`. A relative `base` is
    /// resolved against the home directory.
    #[tracing::instrument(name = "metric_learner.store.open", level = "debug", skip_all)]
    pub fn with_base_dir(metric_name: impl Into<String>, base: impl AsRef<Path>) -> Result<Self> {
        let metric_name = metric_name.into();
        if metric_name.is_empty() || metric_name.contains(['/', '\\']) || metric_name == ".." {
            bail!("invalid metric name `{metric_name}`");
        }

        let base = base.as_ref();
        let base = if base.is_absolute() {
            base.to_path_buf()
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow!("could not determine the home directory"))?
                .join(base)
        };

        let data_dir = base.join(&metric_name);
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        debug!(data_dir = %data_dir.display(), "instance store ready");

        Ok(Self {
            metric_name,
            data_dir,
        })
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Records a new, unlabeled instance and returns the file it was written to.
    #[tracing::instrument(
        name = "metric_learner.store.save",
        level = "debug",
        skip_all,
        fields(metric = %self.metric_name)
    )]
    pub fn save_instance(
        &self,
        input: &str,
        prediction: &str,
        gold: Option<&str>,
        score: Option<f32>,
    ) -> Result<PathBuf> {
        let mut instance = Instance::new(input, prediction, gold.map(str::to_string), score);
        let mut stamp = Local::now().naive_local();

        loop {
            instance.datetime = format_datetime(&stamp);
            match self.write_new(&instance) {
                Ok(path) => {
                    debug!(path = %path.display(), "instance saved");
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    stamp += TimeDelta::microseconds(1);
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to save instance in {}", self.data_dir.display())
                    });
                }
            }
        }
    }

    fn path_for(&self, datetime: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", file_stem_for(datetime)))
    }

    /// Writes a record that must not exist yet.
    fn write_new(&self, instance: &Instance) -> std::io::Result<PathBuf> {
        let path = self.path_for(&instance.datetime);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(to_pretty_json(instance)?.as_bytes())?;
        Ok(path)
    }

    /// Replaces a record through a temp file so readers never see half a write.
    fn overwrite(&self, path: &Path, instance: &Instance) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, to_pretty_json(instance)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {}", self.data_dir.display()));
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn read_record(path: &Path) -> Result<Instance> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// All readable records, oldest first. Malformed files are skipped.
    #[tracing::instrument(
        name = "metric_learner.store.load",
        level = "debug",
        skip(self),
        fields(metric = %self.metric_name)
    )]
    pub fn load_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        for path in self.record_paths()? {
            match Self::read_record(&path) {
                Ok(instance) => instances.push(instance),
                Err(err) => warn!(file = %path.display(), error = %err, "skipping unreadable record"),
            }
        }

        instances.sort_by(|a, b| a.datetime.cmp(&b.datetime));
        debug!(count = instances.len(), "instances loaded");
        Ok(instances)
    }

    pub fn labeled_instances(&self) -> Result<Vec<Instance>> {
        Ok(self
            .load_instances()?
            .into_iter()
            .filter(Instance::is_labeled)
            .collect())
    }

    pub fn unlabeled_instances(&self) -> Result<Vec<Instance>> {
        Ok(self
            .load_instances()?
            .into_iter()
            .filter(|instance| !instance.is_labeled())
            .collect())
    }

    /// Sets the human score on the record identified by `datetime`.
    ///
    /// Returns `Ok(false)` when no record has that timestamp.
    #[tracing::instrument(
        name = "metric_learner.store.update_user_score",
        level = "debug",
        skip(self),
        fields(metric = %self.metric_name)
    )]
    pub fn update_user_score(&self, datetime: &str, user_score: f32) -> Result<bool> {
        if !(0.0..=1.0).contains(&user_score) {
            bail!("user score {user_score} is outside the valid range of 0-1");
        }

        for path in self.record_paths()? {
            let mut instance = match Self::read_record(&path) {
                Ok(instance) => instance,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping unreadable record");
                    continue;
                }
            };

            if instance.datetime == datetime {
                instance.user_score = Some(user_score);
                self.overwrite(&path, &instance)
                    .with_context(|| format!("failed to update {}", path.display()))?;
                debug!(file = %path.display(), "user score updated");
                return Ok(true);
            }
        }

        debug!("no record with that datetime");
        Ok(false)
    }

    /// Labeled instances as training examples, oldest first.
    pub fn labeled_dataset(&self) -> Result<Vec<Example>> {
        Ok(self
            .load_instances()?
            .iter()
            .filter_map(Instance::to_example)
            .collect())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let instances = self.load_instances()?;
        let labeled = instances.iter().filter(|i| i.is_labeled()).count();
        Ok(StoreStats {
            total: instances.len(),
            labeled,
            unlabeled: instances.len() - labeled,
        })
    }

    /// Writes every record as one JSON object per line. Returns the count.
    pub fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let instances = self.load_instances()?;
        let mut out = String::new();
        for instance in &instances {
            out.push_str(&serde_json::to_string(instance)?);
            out.push('\n');
        }
        fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))?;

        info!(count = instances.len(), path = %path.display(), "instances exported");
        Ok(instances.len())
    }

    /// Adds records from a JSON-lines file, keeping their timestamps.
    /// Records whose timestamp already exists are skipped. Returns the number
    /// imported.
    pub fn import_jsonl(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

        let mut imported = 0;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let instance: Instance = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), idx + 1))?;
            NaiveDateTime::parse_from_str(&instance.datetime, "%Y-%m-%dT%H:%M:%S%.f").with_context(
                || format!("{}:{}: invalid datetime `{}`", path.display(), idx + 1, instance.datetime),
            )?;

            match self.write_new(&instance) {
                Ok(_) => imported += 1,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(datetime = %instance.datetime, "record already present");
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(imported, path = %path.display(), "instances imported");
        Ok(imported)
    }
}

fn to_pretty_json(instance: &Instance) -> std::io::Result<String> {
    serde_json::to_string_pretty(instance).map_err(std::io::Error::other)
}

/// Labeled dataset of `store`, ready for optimization.
pub fn get_labeled_dataset(store: &InstanceStore) -> Result<Vec<Example>> {
    store.labeled_dataset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, InstanceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = InstanceStore::with_base_dir("test_metric", dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn rejects_path_like_metric_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InstanceStore::with_base_dir("../escape", dir.path()).is_err());
        assert!(InstanceStore::with_base_dir("", dir.path()).is_err());
    }

    #[test]
    fn saves_in_quick_succession_never_collide() {
        let (_dir, store) = store();
        let paths: Vec<_> = (0..20)
            .map(|i| store.save_instance(&format!("Q{i}"), "A", None, None).unwrap())
            .collect();

        let unique: std::collections::BTreeSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), 20);

        let instances = store.load_instances().unwrap();
        let mut stamps: Vec<_> = instances.iter().map(|i| i.datetime.clone()).collect();
        stamps.dedup();
        assert_eq!(stamps.len(), 20);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let (_dir, store) = store();
        store.save_instance("Q", "A", None, None).unwrap();
        fs::write(store.data_dir().join("broken.json"), "{not json").unwrap();
        fs::write(store.data_dir().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.load_instances().unwrap().len(), 1);
    }

    #[test]
    fn out_of_range_user_score_is_an_error() {
        let (_dir, store) = store();
        store.save_instance("Q", "A", None, None).unwrap();
        let datetime = store.load_instances().unwrap()[0].datetime.clone();

        assert!(store.update_user_score(&datetime, 1.5).is_err());
        assert!(store.load_instances().unwrap()[0].user_score.is_none());
    }
}
