use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::snapshot::Snapshot;

/// Where sessions persist and retrieve their snapshot. The store never knows
/// the medium behind it.
pub trait SnapshotStorage {
    fn persist(&mut self, snapshot: &Snapshot) -> anyhow::Result<()>;

    fn retrieve(&self) -> anyhow::Result<Option<Snapshot>>;
}

/// A single JSON document at `<data_dir>/<storage_key>.json`.
#[derive(Debug)]
pub struct FileStorage {
    pub data_dir: PathBuf,
    pub snapshot_path: PathBuf,
    palette: Vec<String>,
}

impl FileStorage {
    /// `palette` repairs quests stored without a color.
    #[tracing::instrument(skip(data_dir, palette))]
    pub fn open(data_dir: &Path, storage_key: &str, palette: Vec<String>) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let snapshot_path = data_dir.join(format!("{storage_key}.json"));

        info!(
            data_dir = %data_dir.display(),
            snapshot = %snapshot_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            snapshot_path,
            palette,
        })
    }
}

impl SnapshotStorage for FileStorage {
    #[tracing::instrument(skip(self, snapshot))]
    fn persist(&mut self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let text = snapshot.to_json_pretty(Utc::now())?;
        write_atomic(&self.snapshot_path, &text)
            .with_context(|| format!("failed to save {}", self.snapshot_path.display()))
    }

    #[tracing::instrument(skip(self))]
    fn retrieve(&self) -> anyhow::Result<Option<Snapshot>> {
        if !self.snapshot_path.exists() {
            debug!(file = %self.snapshot_path.display(), "no snapshot stored yet");
            return Ok(None);
        }

        let text = fs::read_to_string(&self.snapshot_path)
            .with_context(|| format!("failed reading {}", self.snapshot_path.display()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let snapshot = Snapshot::from_json(&text, &self.palette)
            .with_context(|| format!("failed parsing {}", self.snapshot_path.display()))?;
        debug!(
            quests = snapshot.quests.len(),
            tasks = snapshot.tasks.len(),
            "retrieved snapshot"
        );
        Ok(Some(snapshot))
    }
}

#[tracing::instrument(skip(path, text))]
pub fn write_atomic(path: &Path, text: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = text.len(), "writing file atomically");

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(text.as_bytes())?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
