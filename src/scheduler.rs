//! Extraction scheduling: the supervising poll loop and per-project cycles.
//!
//! A single loop ticks on a fixed interval across all tracked projects. Each
//! tick spawns at most one cycle task per project; a project whose previous
//! cycle is still running (a slow summarizer call, a backoff sleep) is simply
//! skipped until it finishes, so one stuck project never delays the rest.
//!
//! A cycle task takes sole ownership of its project's [`ProjectState`] for
//! its whole duration; the supervisor moves the state into the task and
//! gets it back on join. That makes the at-most-one-extraction-in-flight
//! rule and the single-writer rule for the state and notes files structural
//! rather than something a lock has to enforce.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::models::{
    ExtractionCandidate, NoteRecord, ProjectState, SchedulePhase, SourceCapture, TrackedProject,
};
use crate::source::{self, SourceError};
use crate::store::notes::{self, CompactionPolicy, NotesDocument};
use crate::store::StateStore;
use crate::summarizer::{extract_with_retry, ExtractRequest, Summarize, MAX_ATTEMPTS};
use crate::{discover, git, transcript};

/// Live view of one project, published for the status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub name: String,
    pub root: PathBuf,
    pub phase: String,
    pub bytes_pending: u64,
    pub session_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_extract_time: Option<DateTime<Utc>>,
    pub current_task: Option<String>,
    pub loose_threads: Vec<String>,
}

/// Shared, read-mostly snapshot map consumed by the status API.
pub type StatusMap = Arc<RwLock<HashMap<String, ProjectStatus>>>;

/// Everything a cycle task needs besides the project itself.
#[derive(Clone)]
pub struct CycleContext {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    pub summarizer: Arc<dyn Summarize>,
    pub status: StatusMap,
}

struct ProjectSlot {
    project: TrackedProject,
    /// Present between cycles; `None` while a cycle task owns it.
    state: Option<ProjectState>,
    in_flight: Option<JoinHandle<Option<ProjectState>>>,
}

/// The supervising poll loop over all tracked projects.
pub struct Supervisor {
    ctx: CycleContext,
    slots: Vec<ProjectSlot>,
}

impl Supervisor {
    pub fn new(ctx: CycleContext) -> Self {
        let slots = ctx
            .config
            .tracked_projects()
            .into_iter()
            .map(|project| ProjectSlot {
                project,
                state: None,
                in_flight: None,
            })
            .collect();
        Self { ctx, slots }
    }

    /// Run until the shutdown signal flips. In-flight cycles get a grace
    /// period to finish; an abandoned cycle leaves its bytes uncommitted,
    /// never partially committed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(StdDuration::from_secs(self.ctx.config.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(projects = self.slots.len(), "Scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopping, waiting for in-flight cycles");
        for slot in &mut self.slots {
            if let Some(handle) = slot.in_flight.take() {
                if tokio::time::timeout(StdDuration::from_secs(5), handle)
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        project = %slot.project.name,
                        "Abandoning in-flight cycle; pending bytes stay uncommitted"
                    );
                }
            }
        }
    }

    async fn tick(&mut self) {
        for slot in &mut self.slots {
            match slot.in_flight.take() {
                Some(handle) if !handle.is_finished() => {
                    // Still extracting; checked again next poll.
                    slot.in_flight = Some(handle);
                    continue;
                }
                Some(handle) => match handle.await {
                    Ok(state) => slot.state = state,
                    Err(e) => {
                        tracing::error!(project = %slot.project.name, "Cycle task failed: {}", e);
                        slot.state = None;
                    }
                },
                None => {}
            }

            let project = slot.project.clone();
            let state = slot.state.take();
            let ctx = self.ctx.clone();
            slot.in_flight = Some(tokio::spawn(run_cycle(project, state, ctx)));
        }
    }
}

/// Byte/idle trigger rule.
///
/// Extraction fires once enough new content has accumulated, or once any
/// pending content has sat idle long enough. Nothing pending never fires.
pub fn should_extract(
    bytes_pending: u64,
    last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_new_bytes: u64,
    idle_seconds: u64,
) -> bool {
    if bytes_pending == 0 {
        return false;
    }
    if bytes_pending >= min_new_bytes {
        return true;
    }
    match last_activity {
        Some(at) => now - at >= Duration::seconds(idle_seconds as i64),
        None => false,
    }
}

/// One poll cycle for one project: read new bytes, update accumulation,
/// extract if triggered, publish status.
///
/// Returns the (possibly advanced) state, or `None` when the state could not
/// be resolved at all (the next cycle retries the load). Every failure path
/// in between keeps the pending bytes: offsets only advance when a note has
/// been durably committed.
pub async fn run_cycle(
    project: TrackedProject,
    state: Option<ProjectState>,
    ctx: CycleContext,
) -> Option<ProjectState> {
    let state = match state {
        Some(state) => state,
        None => match ctx.store.load(&project.root) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(project = %project.name, "Unusable project state: {:#}", e);
                return None;
            }
        },
    };

    // File discovery and incremental reads are blocking I/O.
    let (mut state, captures) = {
        let project_for_poll = project.clone();
        let config = ctx.config.clone();
        match tokio::task::spawn_blocking(move || {
            let mut state = state;
            let captures = poll_sources(&project_for_poll, &mut state, &config);
            (state, captures)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(project = %project.name, "Source poll panicked: {}", e);
                return None;
            }
        }
    };

    let now = Utc::now();
    let pending: u64 = captures.iter().map(|c| c.range.end - c.range.start).sum();
    if pending > state.bytes_since_extract {
        state.last_activity = Some(now);
    }
    state.bytes_since_extract = pending;
    state.phase = if pending == 0 {
        SchedulePhase::Idle
    } else {
        SchedulePhase::Accumulating
    };

    let notes_file = notes::notes_path(&project.root);
    let mut doc = match NotesDocument::load_or_create(&notes_file, &project.name) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::error!(project = %project.name, "Unreadable notes document: {:#}", e);
            publish_status(&ctx, &project, &state, None).await;
            return Some(state);
        }
    };

    let triggered = should_extract(
        pending,
        state.last_activity,
        now,
        ctx.config.min_new_bytes,
        ctx.config.idle_seconds,
    );
    let floor_elapsed = state.last_extract_time.is_none_or(|at| {
        now - at >= Duration::seconds(ctx.config.min_extract_interval_seconds as i64)
    });

    if triggered && floor_elapsed {
        let candidate = ExtractionCandidate {
            captures,
            captured_at: now,
        };
        state.phase = SchedulePhase::Extracting;
        publish_status(&ctx, &project, &state, Some(&doc)).await;

        extract_and_commit(&project, &mut state, &mut doc, candidate, &ctx).await;
    }

    publish_status(&ctx, &project, &state, Some(&doc)).await;
    Some(state)
}

/// Read every session log's delta past its stored offset, handling rotation.
fn poll_sources(
    project: &TrackedProject,
    state: &mut ProjectState,
    config: &Config,
) -> Vec<SourceCapture> {
    let claude_dir = config.claude_projects_dir();
    let codex_dir = config.codex_sessions_dir();
    let logs = discover::session_logs(claude_dir.as_deref(), codex_dir.as_deref(), &project.root);

    let mut captures = Vec::new();
    for log in logs {
        let offset = state.offset_for(&log.path);
        let delta = match source::read_new(&log.path, offset) {
            Ok(delta) => delta,
            Err(SourceError::Truncated { offset, length }) => {
                tracing::warn!(
                    project = %project.name,
                    log = %log.path.display(),
                    offset,
                    length,
                    "Session log rotated, reprocessing from start"
                );
                state.offsets.insert(log.path.clone(), 0);
                match source::read_new(&log.path, 0) {
                    Ok(delta) => delta,
                    Err(e) => {
                        tracing::warn!(log = %log.path.display(), "Skipping log this cycle: {}", e);
                        continue;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(log = %log.path.display(), "Skipping log this cycle: {}", e);
                continue;
            }
        };

        if delta.is_empty() {
            continue;
        }
        let start = state.offset_for(&log.path);
        captures.push(SourceCapture {
            path: log.path,
            range: start..delta.end_offset,
            tool: log.tool.as_str().to_string(),
            text: delta.text,
        });
    }

    captures
}

/// Run the summarizer over a captured candidate and, on success, commit the
/// note, the compaction pass, and the advanced state.
async fn extract_and_commit(
    project: &TrackedProject,
    state: &mut ProjectState,
    doc: &mut NotesDocument,
    candidate: ExtractionCandidate,
    ctx: &CycleContext,
) {
    let rendered = candidate
        .captures
        .iter()
        .map(|c| {
            let tool = match c.tool.as_str() {
                "codex" => discover::Tool::Codex,
                _ => discover::Tool::Claude,
            };
            transcript::render(tool, &c.text)
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if rendered.is_empty() {
        // Nothing conversational in the delta (bare snapshots, meta records).
        // Advance past it without spending a summarizer call or a session id.
        tracing::debug!(
            project = %project.name,
            bytes = candidate.total_bytes(),
            "Content-free delta, skipping extraction"
        );
        advance_offsets(state, &candidate);
        state.phase = SchedulePhase::Idle;
        persist_state(ctx, project, state);
        return;
    }

    let request = ExtractRequest {
        project: &project.name,
        tool: candidate.dominant_tool(),
        transcript: &rendered,
        prior_context: doc.prior_context(),
    };

    let draft = match extract_with_retry(&*ctx.summarizer, request, MAX_ATTEMPTS).await {
        Ok(draft) => draft,
        Err(e) => {
            // Bytes stay pending; the next poll re-captures the same or a
            // larger delta.
            tracing::warn!(project = %project.name, "Extraction failed, retaining bytes: {}", e);
            state.phase = SchedulePhase::Accumulating;
            return;
        }
    };

    let head = git::head_revision(&project.root).await;
    let commits = git::commits_since(&project.root, state.last_git_commit.as_deref()).await;

    let record = NoteRecord {
        session_id: state.session_counter + 1,
        timestamp: candidate.captured_at,
        tool: candidate.dominant_tool().to_string(),
        draft,
        commits,
    };

    doc.append(&record);
    if head.is_some() {
        doc.last_revision = head.clone();
    }

    let notes_file = notes::notes_path(&project.root);
    if let Err(e) = doc.save(&notes_file) {
        // The previous on-disk document is still intact; nothing advances.
        tracing::error!(project = %project.name, "Failed to write notes document: {:#}", e);
        state.phase = SchedulePhase::Accumulating;
        return;
    }

    tracing::info!(
        project = %project.name,
        session = record.session_id,
        bytes = candidate.total_bytes(),
        "Committed session note"
    );

    advance_offsets(state, &candidate);
    state.last_extract_time = Some(Utc::now());
    state.session_counter += 1;
    if head.is_some() {
        state.last_git_commit = head;
    }
    state.phase = SchedulePhase::Idle;
    persist_state(ctx, project, state);

    let policy = CompactionPolicy {
        max_sessions: ctx.config.max_sessions,
        max_lines: ctx.config.max_lines,
        keep_recent: ctx.config.keep_recent,
        summary_max_tokens: ctx.config.archive_summary_max_tokens,
    };
    match notes::maybe_compact(doc, &policy, &*ctx.summarizer).await {
        Ok(true) => {
            if let Err(e) = doc.save(&notes_file) {
                // The appended note is already durable; compaction reruns
                // after the next append.
                tracing::error!(project = %project.name, "Failed to write compacted notes: {:#}", e);
            }
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(project = %project.name, "Archive compaction failed: {}", e);
        }
    }
}

fn advance_offsets(state: &mut ProjectState, candidate: &ExtractionCandidate) {
    for capture in &candidate.captures {
        state.offsets.insert(capture.path.clone(), capture.range.end);
    }
    state.bytes_since_extract = 0;
}

fn persist_state(ctx: &CycleContext, project: &TrackedProject, state: &ProjectState) {
    if let Err(e) = ctx.store.save(&project.root, state) {
        // The in-memory state stays advanced; the next successful save
        // covers this one. A restart before then re-extracts the last range.
        tracing::error!(project = %project.name, "Failed to persist project state: {:#}", e);
    }
}

async fn publish_status(
    ctx: &CycleContext,
    project: &TrackedProject,
    state: &ProjectState,
    doc: Option<&NotesDocument>,
) {
    let status = ProjectStatus {
        name: project.name.clone(),
        root: project.root.clone(),
        phase: state.phase.as_str().to_string(),
        bytes_pending: state.bytes_since_extract,
        session_count: state.session_counter,
        last_activity: state.last_activity,
        last_extract_time: state.last_extract_time,
        current_task: doc.and_then(|d| d.current_task().map(str::to_string)),
        loose_threads: doc.map(|d| d.loose_threads(5)).unwrap_or_default(),
    };
    ctx.status
        .write()
        .await
        .insert(project.name.clone(), status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn large_accumulation_triggers_regardless_of_idle() {
        // 600 fresh bytes beat the 500-byte threshold immediately.
        assert!(should_extract(600, Some(at(0)), at(1), 500, 60));
        assert!(should_extract(600, Some(at(0)), at(3600), 500, 60));
    }

    #[test]
    fn small_accumulation_triggers_only_after_idle_window() {
        assert!(!should_extract(10, Some(at(0)), at(30), 500, 60));
        assert!(should_extract(10, Some(at(0)), at(60), 500, 60));
        assert!(should_extract(10, Some(at(0)), at(600), 500, 60));
    }

    #[test]
    fn nothing_pending_never_triggers() {
        assert!(!should_extract(0, Some(at(0)), at(3600), 500, 60));
        assert!(!should_extract(0, None, at(3600), 500, 60));
    }

    #[test]
    fn exact_threshold_triggers() {
        assert!(should_extract(500, Some(at(0)), at(1), 500, 60));
    }
}
