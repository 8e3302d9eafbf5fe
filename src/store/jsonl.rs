//! Append-only JSONL event log.
//!
//! Each namespace is one file under the store directory holding one
//! kind-tagged [`Record`] per line. Page cursors are byte offsets of the
//! line a page starts at, so each page reads only its own part of the file.
//!
//! A crash mid-append can leave a line without its newline. The next
//! append terminates that fragment first, and readers skip it as malformed.

use super::{EventQuery, EventStore, Page, PageRequest};
use crate::error::{AnalyticsError, Result};
use crate::models::Record;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

/// Event log backed by `<dir>/<namespace>.jsonl`.
pub struct JsonlStore {
    path: PathBuf,
    /// Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open (creating the directory if needed) the log for a namespace.
    pub async fn open(dir: &Path, namespace: &str) -> Result<Self> {
        validate_namespace(namespace)?;

        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            AnalyticsError::StoreUnavailable(format!(
                "cannot create store directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self {
            path: dir.join(format!("{}.jsonl", namespace)),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, action: &str, err: std::io::Error) -> AnalyticsError {
        AnalyticsError::StoreUnavailable(format!(
            "failed to {} {}: {}",
            action,
            self.path.display(),
            err
        ))
    }
}

#[async_trait]
impl EventStore for JsonlStore {
    async fn append(&self, record: Record) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.unavailable("open", e))?;

        let len = file
            .metadata()
            .await
            .map_err(|e| self.unavailable("stat", e))?
            .len();
        let torn = len > 0
            && !ends_with_newline(&mut file)
                .await
                .map_err(|e| self.unavailable("read", e))?;
        if torn {
            warn!("Terminating torn line at end of {}", self.path.display());
            line.insert(0, b'\n');
        }

        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // Drop whatever part of the line made it to disk
            if let Err(rollback) = file.set_len(len).await {
                warn!(
                    "Could not roll back partial append to {}: {}",
                    self.path.display(),
                    rollback
                );
            }
            return Err(self.unavailable("append to", e));
        }

        Ok(())
    }

    async fn query_page(&self, query: &EventQuery, page: PageRequest) -> Result<Page> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Page::default()),
            Err(e) => return Err(self.unavailable("open", e)),
        };
        file.seek(SeekFrom::Start(page.cursor))
            .await
            .map_err(|e| self.unavailable("seek in", e))?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut position = page.cursor;
        let mut records = Vec::new();

        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| self.unavailable("read", e))?;
            if read == 0 {
                return Ok(Page { records, next: None });
            }

            let line_start = position;
            position += read as u64;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<Record>(&line) {
                Ok(record) if query.matches(&record) => {
                    // A full page plus one more match means another page follows
                    if records.len() == page.limit {
                        return Ok(Page {
                            records,
                            next: Some(page.resume_at(line_start)),
                        });
                    }
                    records.push(record);
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "Skipping malformed line at byte {} in {}: {}",
                    line_start,
                    self.path.display(),
                    e
                ),
            }
        }
    }
}

async fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1)).await?;
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

/// A namespace names one log file, so only `[A-Za-z0-9_-]+` is allowed.
pub fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if !is_valid_namespace(namespace) {
        return Err(AnalyticsError::StoreUnavailable(format!(
            "invalid namespace {:?}: use letters, digits, '-' or '_'",
            namespace
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionRecord, Outcome, RecordKind, UnitOutcome};
    use crate::store::FieldFilter;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn unit(executor: &str, days_ago: i64) -> Record {
        Record::UnitOutcome(UnitOutcome {
            work_item_id: format!("WI-{}", days_ago),
            unit_id: "u1".to_string(),
            unit_name: "migrations".to_string(),
            executor: executor.to_string(),
            outcome: Outcome::Success,
            gate_type: "typecheck".to_string(),
            gate_passed: true,
            duration_secs: Some(30.0),
            artifacts: vec!["db/001.sql".to_string()],
            issues: Vec::new(),
            auto_fixed: false,
            recorded_at: Utc::now() - Duration::days(days_ago),
        })
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), "team-a").await.unwrap();

        let recent = unit("backend-builder", 1);
        store.append(recent.clone()).await.unwrap();
        store.append(unit("backend-builder", 40)).await.unwrap();
        store.append(unit("frontend-builder", 1)).await.unwrap();
        store
            .append(Record::Execution(ExecutionRecord {
                work_item_id: "WI-1".to_string(),
                title: "orders".to_string(),
                outcome: Outcome::Success,
                duration_secs: 10.0,
                phases_completed: 3,
                total_phases: 3,
                completed_units: vec!["u1".to_string()],
                failed_units: Vec::new(),
                gate_failures: None,
                lessons: Some("run migrations first".to_string()),
                recorded_at: Utc::now(),
            }))
            .await
            .unwrap();

        let query = EventQuery::new(RecordKind::UnitOutcome, Utc::now() - Duration::days(30))
            .with_filter(FieldFilter::Executor("backend-builder".to_string()));
        let records = store.query(&query, 10).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0], recent);
        assert!(store.path().ends_with("team-a.jsonl"));
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(&dir.path().join("nested"), "fresh")
            .await
            .unwrap();

        let query = EventQuery::new(RecordKind::Execution, Utc::now() - Duration::days(1));
        let records = store.query(&query, 10).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_paging_across_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), "paging").await.unwrap();
        for i in 0..5 {
            store.append(unit("backend-builder", i)).await.unwrap();
        }

        let query = EventQuery::new(RecordKind::UnitOutcome, Utc::now() - Duration::days(30));
        let first = store.query_page(&query, PageRequest::first(2)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let second_request = first.next.unwrap();

        assert!(second_request.cursor > 0);
        assert_eq!(second_request.limit, 2);

        let second = store.query_page(&query, second_request).await.unwrap();
        assert_eq!(second.records.len(), 2);
        assert!(second.next.unwrap().cursor > second_request.cursor);

        assert_eq!(store.query(&query, 2).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), "mixed").await.unwrap();
        store.append(unit("backend-builder", 0)).await.unwrap();

        let mut content = tokio::fs::read_to_string(store.path()).await.unwrap();
        content.push_str("{not json}\n\n");
        tokio::fs::write(store.path(), content).await.unwrap();
        store.append(unit("backend-builder", 0)).await.unwrap();

        let query = EventQuery::new(RecordKind::UnitOutcome, Utc::now() - Duration::days(1));
        assert_eq!(store.query(&query, 10).await.unwrap().len(), 2);
    }

    fn numbered(i: usize) -> Record {
        match unit("backend-builder", 0) {
            Record::UnitOutcome(mut outcome) => {
                outcome.work_item_id = format!("WI-{}", i);
                Record::UnitOutcome(outcome)
            }
            other => other,
        }
    }

    fn everything() -> EventQuery {
        EventQuery::new(RecordKind::UnitOutcome, Utc::now() - Duration::days(1))
    }

    #[tokio::test]
    async fn test_large_log_pages_resume_by_offset() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), "large").await.unwrap();
        let appended: Vec<Record> = (0..1200).map(numbered).collect();
        for record in &appended {
            store.append(record.clone()).await.unwrap();
        }

        let all = store.query(&everything(), 7).await.unwrap();
        assert_eq!(all, appended);

        let first = store
            .query_page(&everything(), PageRequest::first(7))
            .await
            .unwrap();
        let next = first.next.unwrap();
        let content = std::fs::read(store.path()).unwrap();
        let seventh_end = content
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(6)
            .map(|(i, _)| i as u64 + 1)
            .unwrap();
        assert_eq!(next.cursor, seventh_end);

        // Clobber the first line in place; a resumed page never reads it
        let first_newline = content.iter().position(|b| *b == b'\n').unwrap();
        let mut clobbered = content.clone();
        clobbered[..first_newline].fill(b'x');
        std::fs::write(store.path(), &clobbered).unwrap();

        let second = store.query_page(&everything(), next).await.unwrap();
        assert_eq!(second.records, appended[7..14].to_vec());
        assert_eq!(store.query(&everything(), 7).await.unwrap().len(), 1199);
    }

    #[tokio::test]
    async fn test_append_after_torn_line_keeps_next_record() {
        use std::io::Write;

        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path(), "torn").await.unwrap();
        store.append(unit("backend-builder", 1)).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.path())
            .unwrap();
        file.write_all(br#"{"kind":"unit_outcome","work_item_id":"WI-9"#)
            .unwrap();
        drop(file);

        store.append(unit("backend-builder", 2)).await.unwrap();

        let query = EventQuery::new(RecordKind::UnitOutcome, Utc::now() - Duration::days(30));
        let records = store.query(&query, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].work_item_id(), "WI-1");
        assert_eq!(records[1].work_item_id(), "WI-2");

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with('\n'));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_keep_lines_whole() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonlStore::open(dir.path(), "busy").await.unwrap());

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append(numbered(i)).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.lines().count(), 50);
        for line in content.lines() {
            serde_json::from_str::<Record>(line).unwrap();
        }

        let mut ids: Vec<String> = store
            .query(&everything(), 8)
            .await
            .unwrap()
            .iter()
            .map(|r| r.work_item_id().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[tokio::test]
    async fn test_invalid_namespace_rejected() {
        let dir = TempDir::new().unwrap();
        let result = JsonlStore::open(dir.path(), "../escape").await;
        assert!(matches!(result, Err(AnalyticsError::StoreUnavailable(_))));
    }
}
