//! Notes document behavior: append ordering, archival compaction, readback.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use speculate2::speculate;

use logbook::models::{NoteDraft, NoteRecord};
use logbook::store::notes::{maybe_compact, CompactionPolicy, NotesDocument};
use logbook::summarizer::{ExtractRequest, Summarize, SummarizeError};

/// Archive summarizer double; extraction is never exercised here.
struct StubSummarizer;

#[async_trait]
impl Summarize for StubSummarizer {
    async fn extract(&self, _request: ExtractRequest<'_>) -> Result<NoteDraft, SummarizeError> {
        Err(SummarizeError::Permanent("not under test".to_string()))
    }

    async fn summarize_archive(
        &self,
        _sessions: &str,
        _max_tokens: u32,
    ) -> Result<String, SummarizeError> {
        Ok("Condensed: early sessions set up the project and its CI.".to_string())
    }
}

/// A failing summarizer, to show compaction leaves the document untouched.
struct DownSummarizer;

#[async_trait]
impl Summarize for DownSummarizer {
    async fn extract(&self, _request: ExtractRequest<'_>) -> Result<NoteDraft, SummarizeError> {
        Err(SummarizeError::Transient("down".to_string()))
    }

    async fn summarize_archive(
        &self,
        _sessions: &str,
        _max_tokens: u32,
    ) -> Result<String, SummarizeError> {
        Err(SummarizeError::Transient("down".to_string()))
    }
}

fn record(session_id: u64) -> NoteRecord {
    // A dozen bullets per session keeps the fixture documents realistically
    // long, so line-count assertions mean something.
    NoteRecord {
        session_id,
        timestamp: Utc.with_ymd_and_hms(2026, 8, 6, 10, 0, 0).unwrap(),
        tool: "claude".to_string(),
        draft: NoteDraft {
            stated_goal: Some(format!("Goal for session {session_id}")),
            what_happened: (0..12)
                .map(|i| format!("Step {i} of session {session_id}"))
                .collect(),
            left_off_at: Some("In the middle of things".to_string()),
            loose_threads: vec![format!("Follow up from session {session_id}")],
            key_artifacts: vec!["src/lib.rs".to_string()],
        },
        commits: Vec::new(),
    }
}

fn doc_with_sessions(n: u64) -> NotesDocument {
    let mut doc = NotesDocument::new("app");
    for i in 1..=n {
        doc.append(&record(i));
    }
    doc
}

speculate! {
    before {
        let policy = CompactionPolicy {
            max_sessions: 15,
            max_lines: 400,
            keep_recent: 10,
            summary_max_tokens: 500,
        };
    }

    describe "session log" {
        it "keeps the newest entry first" {
            let doc = doc_with_sessions(3);
            let rendered = doc.render();

            let s3 = rendered.find("### session-3").expect("session 3 present");
            let s1 = rendered.find("### session-1").expect("session 1 present");
            assert!(s3 < s1);
            assert!(doc.prior_context().unwrap().starts_with("### session-3"));
        }

        it "reports current task and loose threads from the newest sessions" {
            let doc = doc_with_sessions(2);
            assert_eq!(doc.current_task(), Some("Goal for session 2"));
            assert_eq!(
                doc.loose_threads(2),
                vec!["Follow up from session 2", "Follow up from session 1"]
            );
        }
    }

    describe "compaction" {
        it "folds overflow into the archive and keeps the recent tail intact" {
            // 16 records and well over 400 lines, per the overflow scenario.
            let mut doc = doc_with_sessions(16);
            assert_eq!(doc.record_count(), 16);
            assert!(doc.line_count() > 400);

            let changed = tokio_test::block_on(
                maybe_compact(&mut doc, &policy, &StubSummarizer)
            ).expect("compaction succeeds");

            assert!(changed);
            assert_eq!(doc.record_count(), 11, "10 recent records plus the archive block");

            let rendered = doc.render();
            assert!(rendered.contains("### session-16"));
            assert!(rendered.contains("### session-7"), "10th-newest survives");
            assert!(!rendered.contains("### session-6"), "11th-newest is folded away");
            assert!(rendered.contains("_6 earlier sessions condensed._"));
            assert!(rendered.contains("Condensed: early sessions"));
        }

        it "is byte-identical when the document is under both thresholds" {
            let mut doc = doc_with_sessions(16);
            tokio_test::block_on(maybe_compact(&mut doc, &policy, &StubSummarizer)).unwrap();

            let before = doc.render();
            let changed = tokio_test::block_on(
                maybe_compact(&mut doc, &policy, &StubSummarizer)
            ).unwrap();

            assert!(!changed);
            assert_eq!(doc.render(), before);
        }

        it "extends the archive on repeated overflow" {
            let mut doc = doc_with_sessions(16);
            tokio_test::block_on(maybe_compact(&mut doc, &policy, &StubSummarizer)).unwrap();

            for i in 17..=23 {
                doc.append(&record(i));
            }
            // 17 entries plus the archive block: over the session threshold.
            assert_eq!(doc.record_count(), 18);

            let changed = tokio_test::block_on(
                maybe_compact(&mut doc, &policy, &StubSummarizer)
            ).unwrap();

            assert!(changed);
            assert_eq!(doc.record_count(), 11);
            let rendered = doc.render();
            assert!(rendered.contains("_13 earlier sessions condensed._"));
        }

        it "triggers on line count alone" {
            // Few sessions, many lines: a tight keep-recent still has
            // something to fold.
            let line_policy = CompactionPolicy { keep_recent: 2, ..policy };
            let mut doc = doc_with_sessions(14);
            assert!(doc.record_count() <= line_policy.max_sessions);
            assert!(doc.line_count() > line_policy.max_lines);

            let changed = tokio_test::block_on(
                maybe_compact(&mut doc, &line_policy, &StubSummarizer)
            ).unwrap();

            assert!(changed);
            assert_eq!(doc.record_count(), 3);
        }

        it "does nothing when only recent records exist despite long lines" {
            // Over the line threshold but nothing old enough to fold.
            let mut doc = doc_with_sessions(10);
            let lines = doc.line_count();
            let tight = CompactionPolicy { max_lines: lines - 1, ..policy };

            let changed = tokio_test::block_on(
                maybe_compact(&mut doc, &tight, &StubSummarizer)
            ).unwrap();
            assert!(!changed);
        }

        it "leaves the document untouched when the summarizer fails" {
            let mut doc = doc_with_sessions(16);
            let before = doc.render();

            let result = tokio_test::block_on(
                maybe_compact(&mut doc, &policy, &DownSummarizer)
            );

            assert!(result.is_err());
            assert_eq!(doc.render(), before, "no partial compaction");
        }
    }

    describe "persistence" {
        it "round-trips through disk byte-identically" {
            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("context").join("logbook-notes.md");

            let mut doc = doc_with_sessions(16);
            tokio_test::block_on(maybe_compact(&mut doc, &policy, &StubSummarizer)).unwrap();
            doc.save(&path).unwrap();

            let loaded = NotesDocument::load_or_create(&path, "app").unwrap();
            assert_eq!(loaded.render(), doc.render());
            assert_eq!(loaded.record_count(), 11);
            assert_eq!(loaded.current_task(), Some("Goal for session 16"));
        }
    }
}
