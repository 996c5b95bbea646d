//! Discovery of session log files for a tracked project.
//!
//! Claude Code keeps logs under `~/.claude/projects/<encoded-root>/*.jsonl`,
//! where the encoded name replaces every `/` and `.` in the project root
//! with `-`. Codex keeps logs under `~/.codex/sessions/**/*.jsonl` and
//! records the working directory in each log's leading `session_meta`
//! record, so Codex logs are matched by reading their first line.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Which assistant wrote a session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Claude,
    Codex,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }
}

/// A session log file associated with a tracked project.
#[derive(Debug, Clone)]
pub struct SessionLog {
    pub path: PathBuf,
    pub tool: Tool,
}

/// Encode a project root the way Claude Code names its per-project log
/// directory: `/` and `.` both become `-`.
pub fn encode_project_dir(root: &Path) -> String {
    root.to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '.' { '-' } else { c })
        .collect()
}

/// All session logs currently on disk for `root`.
///
/// Discovery is re-run every poll: new session files appear whenever the
/// user starts a fresh conversation, and tracking them must not require a
/// daemon restart. Missing directories are not an error.
pub fn session_logs(
    claude_projects_dir: Option<&Path>,
    codex_sessions_dir: Option<&Path>,
    root: &Path,
) -> Vec<SessionLog> {
    let mut logs = Vec::new();

    if let Some(dir) = claude_projects_dir {
        let project_dir = dir.join(encode_project_dir(root));
        logs.extend(claude_logs_in(&project_dir));
    }

    if let Some(dir) = codex_sessions_dir {
        logs.extend(codex_logs_in(dir, root));
    }

    logs.sort_by(|a, b| a.path.cmp(&b.path));
    logs
}

fn claude_logs_in(project_dir: &Path) -> Vec<SessionLog> {
    let Ok(entries) = fs::read_dir(project_dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .map(|path| SessionLog {
            path,
            tool: Tool::Claude,
        })
        .collect()
}

fn codex_logs_in(sessions_dir: &Path, root: &Path) -> Vec<SessionLog> {
    let mut logs = Vec::new();
    let mut pending = vec![sessions_dir.to_path_buf()];

    // Codex nests sessions by date (year/month/day); walk the whole tree.
    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "jsonl")
                && session_cwd(&path).is_some_and(|cwd| cwd == root)
            {
                logs.push(SessionLog {
                    path,
                    tool: Tool::Codex,
                });
            }
        }
    }

    logs
}

#[derive(Deserialize)]
struct MetaLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: MetaPayload,
}

#[derive(Deserialize, Default)]
struct MetaPayload {
    #[serde(default)]
    cwd: Option<PathBuf>,
}

/// Working directory recorded in a Codex log's first record, if any.
fn session_cwd(path: &Path) -> Option<PathBuf> {
    let file = fs::File::open(path).ok()?;
    let mut first_line = String::new();
    BufReader::new(file).read_line(&mut first_line).ok()?;

    let meta: MetaLine = serde_json::from_str(first_line.trim()).ok()?;
    if meta.kind == "session_meta" {
        meta.payload.cwd
    } else {
        None
    }
}
