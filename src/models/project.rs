use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project whose coding-assistant sessions are tracked by the daemon.
///
/// Projects are identified by their absolute root path. The daemon never
/// deletes a project; removing one from the config merely disables tracking,
/// and its state file and notes document stay behind untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedProject {
    /// Absolute path to the project root on the local file system.
    pub root: PathBuf,
    /// Display name. Defaults to the root directory's basename.
    pub name: String,
    /// Whether the daemon currently extracts notes for this project.
    pub enabled: bool,
}

impl TrackedProject {
    pub fn new(root: PathBuf) -> Self {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned());
        Self {
            root,
            name,
            enabled: true,
        }
    }
}

/// Where a project sits in the extraction cycle.
///
/// - `Idle`: nothing pending since the last committed extraction
/// - `Accumulating`: new bytes observed, trigger conditions not yet met
/// - `Extracting`: a summarizer call is in flight for this project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePhase {
    #[default]
    Idle,
    Accumulating,
    Extracting,
}

impl SchedulePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Accumulating => "accumulating",
            Self::Extracting => "extracting",
        }
    }
}

/// Per-project extraction bookkeeping.
///
/// Owned exclusively by the project's cycle task while one is running; the
/// supervisor holds it between cycles. Persisted after every committed
/// transition, so a restart loses at most the in-flight (uncommitted)
/// extraction.
///
/// Invariants: offsets never decrease except on a detected source truncation,
/// where the affected offset resets to 0. `bytes_since_extract` returns to 0
/// exactly when an extraction commits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectState {
    /// Last fully processed byte offset per session log file.
    #[serde(default)]
    pub offsets: BTreeMap<PathBuf, u64>,
    /// Bytes of whole records accumulated past the stored offsets.
    #[serde(default)]
    pub bytes_since_extract: u64,
    /// Wall time the watched sources last grew.
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    /// When the last extraction committed.
    #[serde(default)]
    pub last_extract_time: Option<DateTime<Utc>>,
    /// Number of committed extractions; session ids derive from this.
    #[serde(default)]
    pub session_counter: u64,
    /// Head revision recorded at the last committed note, if the project
    /// root is a git repository.
    #[serde(default)]
    pub last_git_commit: Option<String>,
    /// In-memory scheduling phase; recomputed after restart.
    #[serde(skip)]
    pub phase: SchedulePhase,
}

impl ProjectState {
    /// Offset for one source file (0 if never read).
    pub fn offset_for(&self, path: &std::path::Path) -> u64 {
        self.offsets.get(path).copied().unwrap_or(0)
    }
}
