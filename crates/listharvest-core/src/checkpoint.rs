//! Per-worker checkpoint files with atomic tmp→rename
//!
//! Layout: `<root>/<session_id>/worker_NN.json`. Each file holds the worker's
//! processed candidate keys and its shard so far, and is rewritten whole on
//! every flush.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Checkpoint as read back from disk
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint<R> {
    pub session_id: String,
    pub worker_id: usize,
    pub written_at: chrono::DateTime<chrono::Utc>,
    pub processed: Vec<String>,
    pub records: Vec<R>,
}

#[derive(Serialize)]
struct CheckpointOut<'a, R> {
    session_id: &'a str,
    worker_id: usize,
    written_at: chrono::DateTime<chrono::Utc>,
    processed: &'a [String],
    records: &'a [R],
}

/// Writer for one session's checkpoint directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    session_id: String,
    session_dir: PathBuf,
}

impl CheckpointStore {
    /// Create `<root>/<session_id>` and clear stale tmp files in it
    pub fn open(root: &Path, session_id: &str) -> io::Result<Self> {
        let session_dir = root.join(session_id);
        fs::create_dir_all(&session_dir)?;
        cleanup_tmp_files(&session_dir)?;
        Ok(Self {
            root: root.to_path_buf(),
            session_id: session_id.to_string(),
            session_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn path_for(&self, worker_id: usize) -> PathBuf {
        self.session_dir.join(format!("worker_{worker_id:02}.json"))
    }

    /// Persist a worker checkpoint, replacing the previous one atomically
    pub fn write<R: Serialize>(
        &self,
        worker_id: usize,
        processed: &[String],
        records: &[R],
    ) -> io::Result<()> {
        let out = CheckpointOut {
            session_id: &self.session_id,
            worker_id,
            written_at: chrono::Utc::now(),
            processed,
            records,
        };
        let final_path = self.path_for(worker_id);
        let tmp_path = final_path.with_extension("json.tmp");
        let json = serde_json::to_vec(&out).map_err(io::Error::other)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &final_path)?;
        log::debug!(
            "worker_{worker_id:02}: checkpoint {} processed, {} records",
            processed.len(),
            records.len()
        );
        Ok(())
    }

    /// Load every checkpoint under `root`, across all sessions.
    ///
    /// Unreadable files are logged and skipped.
    pub fn load_all<R: DeserializeOwned>(root: &Path) -> io::Result<Vec<Checkpoint<R>>> {
        if !root.exists() {
            return Ok(Vec::new());
        }
        let pattern = root.join("*").join("worker_*.json");
        let pattern_str = pattern.to_string_lossy();
        let paths = glob::glob(&pattern_str)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut checkpoints = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(_) => continue,
            };
            match read_checkpoint(&path) {
                Ok(cp) => checkpoints.push(cp),
                Err(e) => log::warn!("Skipping unreadable checkpoint {}: {e}", path.display()),
            }
        }
        // Oldest first so later sessions win ties during restore
        checkpoints.sort_by(|a: &Checkpoint<R>, b| a.written_at.cmp(&b.written_at));
        Ok(checkpoints)
    }
}

fn read_checkpoint<R: DeserializeOwned>(path: &Path) -> io::Result<Checkpoint<R>> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Remove stale .tmp files in a directory
pub fn cleanup_tmp_files(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
