//! Logbook keeps living session notes for AI-assisted development.
//!
//! A background daemon tails the append-only session logs that coding
//! assistants write, and whenever a project has accumulated enough new,
//! settled content, distills the delta into a structured note via an
//! external summarization service. Notes land in a per-project markdown
//! document that is kept bounded by archival compaction.

pub mod api;
pub mod config;
pub mod discover;
pub mod git;
pub mod models;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod summarizer;
pub mod transcript;
