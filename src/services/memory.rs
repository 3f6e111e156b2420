use crate::models::{CandidateFilter, CandidateRecord};
use crate::services::traits::{RecordStore, StoreError};
use async_trait::async_trait;

/// Record store held entirely in memory
///
/// Applies the same inclusion predicate as the SQL store. Used by tests,
/// benchmarks and local runs without a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Vec<CandidateRecord>,
}

impl InMemoryStore {
    pub fn new(records: Vec<CandidateRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<CandidateRecord> for InMemoryStore {
    fn from_iter<T: IntoIterator<Item = CandidateRecord>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|record| filter.matches(&record.postal_code))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}
