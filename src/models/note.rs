use std::ops::Range;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured output of one summarizer call, before it is committed.
///
/// All fields are optional in the sense that the service may leave them
/// empty; a draft with every field empty is still a valid (if useless)
/// extraction result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteDraft {
    /// What the user said they were trying to do.
    pub stated_goal: Option<String>,
    /// Ordered list of things that happened during the captured range.
    pub what_happened: Vec<String>,
    /// Where the session left off.
    pub left_off_at: Option<String>,
    /// Open questions or unfinished work worth picking back up.
    pub loose_threads: Vec<String>,
    /// File paths that were central to the work.
    pub key_artifacts: Vec<String>,
}

impl NoteDraft {
    /// A draft with no content at all: the summarizer saw nothing worth
    /// recording.
    pub fn is_empty(&self) -> bool {
        self.stated_goal.is_none()
            && self.what_happened.is_empty()
            && self.left_off_at.is_none()
            && self.loose_threads.is_empty()
            && self.key_artifacts.is_empty()
    }
}

/// One committed extraction, identified by its session id within a project.
///
/// Records are immutable once appended to the notes document. Compaction may
/// later fold old records into the archive summary, but never rewrites one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Derived from the project's session counter; strictly increasing.
    pub session_id: u64,
    pub timestamp: DateTime<Utc>,
    /// Which assistant produced the transcript ("claude", "codex").
    pub tool: String,
    #[serde(flatten)]
    pub draft: NoteDraft,
    /// Commits that landed since the previous recorded session.
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

/// A version-control commit observed since the last recorded session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub revision: String,
    pub message: String,
}

/// A captured byte range eligible for extraction.
///
/// Created by the scheduler once trigger conditions are met, consumed by the
/// summarizer call, and discarded after the resulting record commits or the
/// attempt is abandoned. Offsets only advance when the whole candidate
/// commits, so an abandoned candidate is re-captured (same or larger) on a
/// later cycle.
#[derive(Debug, Clone)]
pub struct ExtractionCandidate {
    /// Per-source captured ranges and their rendered content.
    pub captures: Vec<SourceCapture>,
    pub captured_at: DateTime<Utc>,
}

/// The pending range of a single session log inside a candidate.
#[derive(Debug, Clone)]
pub struct SourceCapture {
    pub path: PathBuf,
    /// Byte range `[start, end)` of whole records covered by this capture.
    pub range: Range<u64>,
    pub tool: String,
    /// The raw delta, already trimmed to whole records.
    pub text: String,
}

impl ExtractionCandidate {
    pub fn total_bytes(&self) -> u64 {
        self.captures.iter().map(|c| c.range.end - c.range.start).sum()
    }

    /// Tool identifier for the resulting note: the source that contributed
    /// the most bytes wins when several tools were active at once.
    pub fn dominant_tool(&self) -> &str {
        self.captures
            .iter()
            .max_by_key(|c| c.range.end - c.range.start)
            .map(|c| c.tool.as_str())
            .unwrap_or("unknown")
    }
}
