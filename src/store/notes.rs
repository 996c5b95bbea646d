//! The per-project notes document and its archival compactor.
//!
//! The document is human-readable markdown with a fixed skeleton: a header,
//! an Active Context block, a newest-first Session Log, and an optional
//! Archive block holding the condensed history of sessions that have been
//! compacted away. The daemon owns the file exclusively; writes go through
//! [`write_atomic`], so anything else (an editor, a status page) can read it
//! mid-write and still see a complete document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::models::{CommitInfo, NoteRecord};
use crate::store::write_atomic;
use crate::summarizer::{Summarize, SummarizeError};

pub const NOTES_FILENAME: &str = "logbook-notes.md";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Path of a project's notes document: `<root>/context/logbook-notes.md`.
pub fn notes_path(root: &Path) -> PathBuf {
    root.join("context").join(NOTES_FILENAME)
}

/// Thresholds governing archival compaction.
#[derive(Debug, Clone, Copy)]
pub struct CompactionPolicy {
    /// Compact when the record count (entries plus archive block) exceeds this.
    pub max_sessions: usize,
    /// Compact when the rendered line count exceeds this.
    pub max_lines: usize,
    /// Newest entries never folded into the archive.
    pub keep_recent: usize,
    /// Token budget hint for the archive summary.
    pub summary_max_tokens: u32,
}

/// Condensed history of compacted-away sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveBlock {
    /// How many session entries have been folded in over time.
    pub condensed_sessions: usize,
    pub text: String,
}

/// A project's notes document, parsed into its fixed skeleton.
///
/// Session entries are kept verbatim; parsing never rewrites a committed
/// record, it only moves whole entries around. `render` is canonical: a
/// parse/render round trip of a daemon-written document is byte-identical,
/// which is what makes no-op compaction trivially idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct NotesDocument {
    pub project_name: String,
    /// Rendered as-is in the header; set from each appended record.
    pub updated_at: String,
    pub last_revision: Option<String>,
    pub current_task: Option<String>,
    /// Commit batch recorded with the newest entry.
    pub recent_commits: Vec<CommitInfo>,
    /// Newest first.
    entries: Vec<String>,
    pub archive: Option<ArchiveBlock>,
}

impl NotesDocument {
    pub fn new(project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            updated_at: "never".to_string(),
            last_revision: None,
            current_task: None,
            recent_commits: Vec::new(),
            entries: Vec::new(),
            archive: None,
        }
    }

    /// Load the document at `path`, or start a fresh one.
    ///
    /// A file without the Session Log skeleton is treated as foreign and
    /// replaced; the document is daemon-owned.
    pub fn load_or_create(path: &Path, project_name: &str) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(project_name));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read notes document {}", path.display()))?;
        if !content.contains("## Session Log") {
            tracing::warn!(
                "Notes document {} has no session log, starting fresh",
                path.display()
            );
            return Ok(Self::new(project_name));
        }

        Ok(Self::parse(&content, project_name))
    }

    /// Parse a daemon-written document. Unknown header lines are dropped;
    /// session entries and archive text are preserved verbatim.
    pub fn parse(content: &str, fallback_name: &str) -> Self {
        let mut doc = Self::new(fallback_name);

        enum Region {
            Header,
            Commits,
            Entries,
            ArchiveIntro,
            ArchiveText,
        }

        let mut region = Region::Header;
        let mut entry: Vec<&str> = Vec::new();
        let mut archive_text: Vec<&str> = Vec::new();

        fn push_entry(entries: &mut Vec<String>, entry: &mut Vec<&str>) {
            let text = entry.join("\n").trim().to_string();
            if !text.is_empty() {
                entries.push(text);
            }
            entry.clear();
        }

        for line in content.lines() {
            // Region switches apply everywhere except inside archive text.
            if !matches!(region, Region::ArchiveText | Region::ArchiveIntro) {
                if line == "## Session Log" {
                    region = Region::Entries;
                    continue;
                }
                if line == "## Archive" {
                    push_entry(&mut doc.entries, &mut entry);
                    region = Region::ArchiveIntro;
                    doc.archive = Some(ArchiveBlock {
                        condensed_sessions: 0,
                        text: String::new(),
                    });
                    continue;
                }
            }

            match region {
                Region::Header | Region::Commits => {
                    if let Some(name) = field(line, "_Project: ") {
                        doc.project_name = name.to_string();
                    } else if let Some(ts) = field(line, "_Last updated: ") {
                        doc.updated_at = ts.to_string();
                    } else if let Some(rev) = field(line, "_Last revision: ") {
                        doc.last_revision = Some(rev.to_string());
                    } else if let Some(task) = line.strip_prefix("**Current task:** ") {
                        doc.current_task = match task.trim() {
                            "Not set" | "" => None,
                            task => Some(task.to_string()),
                        };
                    } else if let Some(rest) =
                        line.strip_prefix("**Commits since last session:**")
                    {
                        region = if rest.trim() == "None" {
                            Region::Header
                        } else {
                            Region::Commits
                        };
                    } else if let Some(bullet) = line.strip_prefix("- ") {
                        if matches!(region, Region::Commits) {
                            if let Some((revision, message)) = bullet.split_once(": ") {
                                doc.recent_commits.push(CommitInfo {
                                    revision: revision.to_string(),
                                    message: message.to_string(),
                                });
                            }
                        }
                    }
                }
                Region::Entries => {
                    if line.starts_with("### ") {
                        push_entry(&mut doc.entries, &mut entry);
                        entry.push(line);
                    } else if line.trim() == "---" {
                        push_entry(&mut doc.entries, &mut entry);
                    } else if !entry.is_empty() {
                        entry.push(line);
                    }
                }
                Region::ArchiveIntro => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(intro) = field(line, "_") {
                        if let Some(count) = intro
                            .strip_suffix(" earlier sessions condensed.")
                            .and_then(|n| n.parse::<usize>().ok())
                        {
                            if let Some(archive) = &mut doc.archive {
                                archive.condensed_sessions = count;
                            }
                            region = Region::ArchiveText;
                            continue;
                        }
                    }
                    archive_text.push(line);
                    region = Region::ArchiveText;
                }
                Region::ArchiveText => archive_text.push(line),
            }
        }
        push_entry(&mut doc.entries, &mut entry);

        if let Some(archive) = &mut doc.archive {
            archive.text = archive_text.join("\n").trim().to_string();
        }

        doc
    }

    /// Render the canonical document text.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("# {} notes\n\n", self.project_name));
        out.push_str(&format!("_Project: {}_\n", self.project_name));
        out.push_str(&format!("_Last updated: {}_\n", self.updated_at));
        if let Some(rev) = &self.last_revision {
            out.push_str(&format!("_Last revision: {rev}_\n"));
        }

        out.push_str("\n## Active Context\n\n");
        out.push_str(&format!(
            "**Current task:** {}\n",
            self.current_task.as_deref().unwrap_or("Not set")
        ));
        if self.recent_commits.is_empty() {
            out.push_str("**Commits since last session:** None\n");
        } else {
            out.push_str("**Commits since last session:**\n");
            for commit in &self.recent_commits {
                out.push_str(&format!("- {}: {}\n", commit.revision, commit.message));
            }
        }

        out.push_str("\n## Session Log\n");
        for entry in &self.entries {
            out.push('\n');
            out.push_str(entry);
            out.push_str("\n\n---\n");
        }

        if let Some(archive) = &self.archive {
            out.push_str(&format!(
                "\n## Archive\n\n_{} earlier sessions condensed._\n\n{}\n",
                archive.condensed_sessions, archive.text
            ));
        }

        out
    }

    /// Write the document atomically, creating `context/` as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.render())
    }

    /// Append a committed record as the newest session entry and refresh the
    /// Active Context block from it.
    pub fn append(&mut self, record: &NoteRecord) {
        self.updated_at = record.timestamp.format(TIMESTAMP_FORMAT).to_string();
        if let Some(goal) = &record.draft.stated_goal {
            self.current_task = Some(goal.clone());
        }
        self.recent_commits = record
            .commits
            .iter()
            .map(|c| CommitInfo {
                revision: short_rev(&c.revision),
                message: c.message.clone(),
            })
            .collect();

        self.entries.insert(0, render_entry(record));
    }

    /// Records in the document: session entries plus the archive block.
    pub fn record_count(&self) -> usize {
        self.entries.len() + usize::from(self.archive.is_some())
    }

    pub fn line_count(&self) -> usize {
        self.render().lines().count()
    }

    pub fn over_thresholds(&self, policy: &CompactionPolicy) -> bool {
        self.record_count() > policy.max_sessions || self.line_count() > policy.max_lines
    }

    /// The newest entry's text, used as prior context for the summarizer.
    pub fn prior_context(&self) -> Option<&str> {
        self.entries.first().map(String::as_str)
    }

    pub fn current_task(&self) -> Option<&str> {
        self.current_task.as_deref()
    }

    /// Timestamp of the newest session entry.
    pub fn last_session_time(&self) -> Option<DateTime<Utc>> {
        let header = self.entries.first()?.lines().next()?;
        let ts = header.split('|').nth(1)?.trim();
        NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Most recent loose threads across entries, newest first.
    pub fn loose_threads(&self, limit: usize) -> Vec<String> {
        let mut threads = Vec::new();

        for entry in &self.entries {
            let mut in_section = false;
            for line in entry.lines() {
                if line == "**Loose threads:**" {
                    in_section = true;
                } else if in_section {
                    match line.strip_prefix("- ") {
                        Some(item) => {
                            threads.push(item.trim().to_string());
                            if threads.len() == limit {
                                return threads;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        threads
    }
}

fn field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix('_')
}

fn short_rev(revision: &str) -> String {
    revision.chars().take(8).collect()
}

fn render_entry(record: &NoteRecord) -> String {
    let ts = record.timestamp.format(TIMESTAMP_FORMAT);
    let mut entry = format!(
        "### session-{} | {} | {}\n\n",
        record.session_id, ts, record.tool
    );

    entry.push_str(&format!(
        "**Stated goal:** {}\n\n",
        record.draft.stated_goal.as_deref().unwrap_or("Not stated")
    ));

    entry.push_str("**What happened:**\n");
    for item in &record.draft.what_happened {
        entry.push_str(&format!("- {item}\n"));
    }

    entry.push_str(&format!(
        "\n**Left off at:** {}\n\n",
        record
            .draft
            .left_off_at
            .as_deref()
            .unwrap_or("Not specified")
    ));

    entry.push_str("**Loose threads:**\n");
    for thread in &record.draft.loose_threads {
        entry.push_str(&format!("- {thread}\n"));
    }

    if !record.draft.key_artifacts.is_empty() {
        entry.push_str("\n**Key artifacts:**\n");
        for artifact in &record.draft.key_artifacts {
            entry.push_str(&format!("- {artifact}\n"));
        }
    }

    if !record.commits.is_empty() {
        entry.push_str("\n**Commits since last session:**\n");
        for commit in &record.commits {
            entry.push_str(&format!(
                "- {}: {}\n",
                short_rev(&commit.revision),
                commit.message
            ));
        }
    }

    entry.trim_end().to_string()
}

/// Fold everything but the newest entries into the archive summary when the
/// document exceeds its thresholds.
///
/// Returns whether the document changed. Under both thresholds this touches
/// nothing at all, so re-running compaction on an already-compacted document
/// is a no-op. The document is only mutated after the summarizer succeeds;
/// a failed summary call leaves every entry in place for the next attempt.
pub async fn maybe_compact(
    doc: &mut NotesDocument,
    policy: &CompactionPolicy,
    summarizer: &dyn Summarize,
) -> Result<bool, SummarizeError> {
    if !doc.over_thresholds(policy) {
        return Ok(false);
    }
    if doc.entries.len() <= policy.keep_recent {
        // Over the line threshold but nothing old enough to fold away.
        return Ok(false);
    }

    let old = &doc.entries[policy.keep_recent..];
    let mut material = String::new();
    if let Some(archive) = &doc.archive {
        material.push_str("Earlier history summary:\n");
        material.push_str(&archive.text);
        material.push_str("\n\n");
    }
    // Oldest first, so the summary reads chronologically.
    for entry in old.iter().rev() {
        material.push_str(entry);
        material.push_str("\n\n");
    }

    let summary = summarizer
        .summarize_archive(&material, policy.summary_max_tokens)
        .await?;

    let folded = old.len();
    let condensed = doc
        .archive
        .as_ref()
        .map(|a| a.condensed_sessions)
        .unwrap_or(0)
        + folded;
    doc.archive = Some(ArchiveBlock {
        condensed_sessions: condensed,
        text: summary,
    });
    doc.entries.truncate(policy.keep_recent);

    tracing::info!(
        project = %doc.project_name,
        folded,
        remaining = doc.entries.len(),
        "Compacted notes document"
    );
    Ok(true)
}
