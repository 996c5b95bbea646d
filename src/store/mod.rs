//! Persistence for per-project daemon state.
//!
//! Each tracked project gets one JSON state file under the daemon's data
//! directory. Files are replaced atomically (write to a sibling temp file,
//! then rename), so a reader never observes a partial write and a crash
//! leaves the previous file intact.

pub mod notes;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::discover::encode_project_dir;
use crate::models::ProjectState;

/// Store for [`ProjectState`] records, one JSON file per project.
///
/// Only the owning project's cycle task writes a given file (single-writer
/// discipline); anything else may read it at any time thanks to atomic
/// replacement.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).context("Failed to create state directory")?;
        Ok(Self { dir })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "logbook")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Self::open(dirs.data_dir().join("projects"))
    }

    fn state_path(&self, root: &Path) -> PathBuf {
        self.dir.join(format!("{}.json", encode_project_dir(root)))
    }

    /// Load a project's state, or a fresh default if none was persisted yet.
    ///
    /// A corrupt state file is an error, not a silent reset; resetting
    /// offsets to zero would re-extract entire logs.
    pub fn load(&self, root: &Path) -> Result<ProjectState> {
        let path = self.state_path(root);
        if !path.exists() {
            return Ok(ProjectState::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt state file {}", path.display()))
    }

    /// Persist a project's state atomically.
    pub fn save(&self, root: &Path, state: &ProjectState) -> Result<()> {
        let content =
            serde_json::to_string_pretty(state).context("Failed to serialize project state")?;
        write_atomic(&self.state_path(root), &content)
    }
}

/// Replace `path` with `content` via temp-file-and-rename.
///
/// The temp file lives in the same directory so the rename stays on one
/// filesystem and is atomic.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Path has no parent directory: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;

    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create temp file {}", tmp.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write temp file {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync temp file {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}
