//! Event store access.
//!
//! The engine reads and writes the append-only event log only through
//! the [`EventStore`] trait; backends are injected by the caller.

mod jsonl;
#[cfg(test)]
pub mod memory;

use crate::error::Result;
use crate::models::{Record, RecordKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use jsonl::{is_valid_namespace, JsonlStore};

/// Exact-match filter on a record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFilter {
    WorkItem(String),
    Executor(String),
    GateType(String),
}

impl FieldFilter {
    fn matches(&self, record: &Record) -> bool {
        match self {
            FieldFilter::WorkItem(id) => record.work_item_id() == id,
            FieldFilter::Executor(name) => record.executor() == Some(name.as_str()),
            FieldFilter::GateType(gate) => record.gate_type() == Some(gate.as_str()),
        }
    }
}

/// Selects records of one kind at or after a timestamp.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub kind: RecordKind,
    pub filters: Vec<FieldFilter>,
    pub since: DateTime<Utc>,
}

impl EventQuery {
    pub fn new(kind: RecordKind, since: DateTime<Utc>) -> Self {
        Self {
            kind,
            filters: Vec::new(),
            since,
        }
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Returns true if the record satisfies the kind, time and field filters.
    pub fn matches(&self, record: &Record) -> bool {
        record.kind() == self.kind
            && record.recorded_at() >= self.since
            && self.filters.iter().all(|f| f.matches(record))
    }
}

/// Where a page starts and how many records it may hold.
///
/// The cursor is a resume position chosen by the store that produced the
/// previous page (a byte offset for the JSONL log). Callers only pass it
/// back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: u64,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Same page size, resuming at `cursor`.
    pub fn resume_at(self, cursor: u64) -> Self {
        Self { cursor, ..self }
    }
}

/// One batch of query results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    /// Set when more matching records follow; points at the first of them.
    pub next: Option<PageRequest>,
}

/// Append-only log of execution records.
///
/// Results are unordered beyond their timestamps, and callers must not
/// assume an upper bound on how many records a query returns.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store one record atomically. A record is either fully written or not at all.
    async fn append(&self, record: Record) -> Result<()>;

    /// Fetch one page of records matching the query.
    async fn query_page(&self, query: &EventQuery, page: PageRequest) -> Result<Page>;

    /// Fetch every record matching the query, page by page.
    async fn query(&self, query: &EventQuery, page_size: usize) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut request = PageRequest::first(page_size);

        loop {
            let page = self.query_page(query, request).await?;
            records.extend(page.records);
            match page.next {
                Some(next) => request = next,
                None => break,
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use crate::models::{GateFailure, Outcome, UnitOutcome};
    use chrono::Duration;

    fn unit(executor: &str, gate: &str, days_ago: i64) -> Record {
        Record::UnitOutcome(UnitOutcome {
            work_item_id: "WI-1".to_string(),
            unit_id: format!("{}-{}", executor, days_ago),
            unit_name: "unit".to_string(),
            executor: executor.to_string(),
            outcome: Outcome::Success,
            gate_type: gate.to_string(),
            gate_passed: true,
            duration_secs: None,
            artifacts: Vec::new(),
            issues: Vec::new(),
            auto_fixed: false,
            recorded_at: Utc::now() - Duration::days(days_ago),
        })
    }

    #[test]
    fn test_query_matches_kind_time_and_fields() {
        let since = Utc::now() - Duration::days(10);
        let query = EventQuery::new(RecordKind::UnitOutcome, since)
            .with_filter(FieldFilter::Executor("backend-builder".to_string()));

        assert!(query.matches(&unit("backend-builder", "lint", 1)));
        assert!(!query.matches(&unit("frontend-builder", "lint", 1)));
        assert!(!query.matches(&unit("backend-builder", "lint", 20)));

        let failure = Record::GateFailure(GateFailure {
            work_item_id: "WI-1".to_string(),
            unit_id: "u1".to_string(),
            gate_type: "lint".to_string(),
            error_pattern: "unused-import".to_string(),
            error_message: "unused import".to_string(),
            file_location: None,
            suggested_fix: None,
            applied_fix: None,
            auto_fixed: false,
            recorded_at: Utc::now(),
        });
        assert!(!query.matches(&failure));

        let gate_query = EventQuery::new(RecordKind::GateFailure, since)
            .with_filter(FieldFilter::GateType("lint".to_string()));
        assert!(gate_query.matches(&failure));
    }

    #[test]
    fn test_page_request_resume_keeps_limit() {
        let first = PageRequest::first(0);
        assert_eq!(first, PageRequest { cursor: 0, limit: 1 });

        let resumed = PageRequest::first(25).resume_at(4096);
        assert_eq!(resumed.cursor, 4096);
        assert_eq!(resumed.limit, 25);
    }

    #[tokio::test]
    async fn test_memory_pages_resume_at_next_match() {
        let store = MemoryStore::new();
        // a b a b a a
        for executor in ["a", "b", "a", "b", "a", "a"] {
            store.append(unit(executor, "lint", 0)).await.unwrap();
        }

        let query = EventQuery::new(RecordKind::UnitOutcome, Utc::now() - Duration::days(1))
            .with_filter(FieldFilter::Executor("a".to_string()));

        let first = store.query_page(&query, PageRequest::first(2)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let next = first.next.unwrap();
        assert_eq!(next.cursor, 4);

        let second = store.query_page(&query, next).await.unwrap();
        assert_eq!(second.records.len(), 2);
        assert_eq!(second.next, None);
    }

    #[tokio::test]
    async fn test_query_drains_all_pages() {
        let store = MemoryStore::new();
        for i in 0..7 {
            store.append(unit("a", "lint", i)).await.unwrap();
        }
        store.append(unit("b", "lint", 0)).await.unwrap();

        let query = EventQuery::new(RecordKind::UnitOutcome, Utc::now() - Duration::days(30))
            .with_filter(FieldFilter::Executor("a".to_string()));
        let records = store.query(&query, 3).await.unwrap();
        assert_eq!(records.len(), 7);
    }
}
