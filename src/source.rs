//! Log source adapter: incremental reads over append-only session logs.
//!
//! Session logs are newline-delimited JSON written by external tools. The
//! adapter never interprets record content; it only guarantees that a read
//! ends on a record boundary, so an unterminated trailing line is deferred
//! until the writer finishes it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

/// Failures reading a session log.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The log exists but could not be read this cycle. The caller skips the
    /// cycle and retries on the next poll.
    #[error("session log unreadable: {0}")]
    Unavailable(#[from] io::Error),

    /// The log is shorter than the stored offset: it was rotated or
    /// rewritten externally. The caller resets the offset to 0 and treats
    /// the whole file as new.
    #[error("session log truncated: length {length} below offset {offset}")]
    Truncated { offset: u64, length: u64 },
}

/// Whole-record bytes appended since a given offset.
#[derive(Debug, Clone, Default)]
pub struct LogDelta {
    /// The delta content, trimmed to the last complete record.
    pub text: String,
    /// Offset just past the last complete record; the next read starts here.
    pub end_offset: u64,
    /// Complete records in this delta.
    pub record_count: usize,
}

impl LogDelta {
    fn unchanged(offset: u64) -> Self {
        Self {
            text: String::new(),
            end_offset: offset,
            record_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}

/// Read everything appended to `path` since `offset`, up to the last
/// complete record.
///
/// A missing file yields an empty delta with the offset unchanged; the
/// session may simply not have started yet. A file shorter than `offset`
/// yields [`SourceError::Truncated`].
pub fn read_new(path: &Path, offset: u64) -> Result<LogDelta, SourceError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(LogDelta::unchanged(offset));
        }
        Err(e) => return Err(e.into()),
    };

    let length = file.metadata()?.len();
    if length < offset {
        return Err(SourceError::Truncated { offset, length });
    }
    if length == offset {
        return Ok(LogDelta::unchanged(offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity((length - offset) as usize);
    file.read_to_end(&mut buf)?;

    // Only complete records leave the adapter; hold the unterminated tail
    // back for the next read.
    let complete = match buf.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => return Ok(LogDelta::unchanged(offset)),
    };
    buf.truncate(complete);

    let record_count = buf.iter().filter(|&&b| b == b'\n').count();
    Ok(LogDelta {
        text: String::from_utf8_lossy(&buf).into_owned(),
        end_offset: offset + complete as u64,
        record_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_is_empty_delta() {
        let delta = read_new(Path::new("/nonexistent/session.jsonl"), 42).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.end_offset, 42);
    }

    #[test]
    fn reads_from_offset_to_last_complete_record() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"a\":1}}\n{{\"b\":2}}\n{{\"partial").unwrap();
        file.flush().unwrap();

        let delta = read_new(file.path(), 0).unwrap();
        assert_eq!(delta.text, "{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(delta.record_count, 2);
        assert_eq!(delta.end_offset, 16);

        // Finishing the partial record makes it visible from the new offset.
        write!(file, " record\"}}\n").unwrap();
        file.flush().unwrap();

        let delta = read_new(file.path(), delta.end_offset).unwrap();
        assert_eq!(delta.text, "{\"partial record\"}\n");
        assert_eq!(delta.record_count, 1);
    }

    #[test]
    fn unterminated_tail_alone_yields_nothing() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"incomplete").unwrap();
        file.flush().unwrap();

        let delta = read_new(file.path(), 0).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.end_offset, 0);
    }

    #[test]
    fn shrunken_file_reports_truncation() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "short\n").unwrap();
        file.flush().unwrap();

        let err = read_new(file.path(), 1000).unwrap_err();
        match err {
            SourceError::Truncated { offset, length } => {
                assert_eq!(offset, 1000);
                assert_eq!(length, 6);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn unchanged_file_is_empty_delta() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "line\n").unwrap();
        file.flush().unwrap();

        let delta = read_new(file.path(), 5).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.end_offset, 5);
    }
}
