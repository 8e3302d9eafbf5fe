//! In-memory event store for tests.

use super::{EventQuery, EventStore, Page, PageRequest};
use crate::error::Result;
use crate::models::Record;
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, record: Record) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn query_page(&self, query: &EventQuery, page: PageRequest) -> Result<Page> {
        // The cursor is an index into the record vector.
        let records = self.records.read();
        let start = usize::try_from(page.cursor).unwrap_or(usize::MAX);
        let mut matching = records
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, r)| query.matches(r));

        let batch = matching
            .by_ref()
            .take(page.limit)
            .map(|(_, r)| r.clone())
            .collect();
        let next = matching
            .next()
            .map(|(index, _)| page.resume_at(index as u64));

        Ok(Page {
            records: batch,
            next,
        })
    }
}
