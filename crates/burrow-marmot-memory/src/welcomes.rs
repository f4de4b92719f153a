//! `WelcomeStorage` over the in-memory maps.

use burrow_marmot_storage::welcomes::types::{ProcessedWelcome, Welcome, WelcomeState};
use burrow_marmot_storage::welcomes::{WelcomeError, WelcomeStorage};
use burrow_marmot_storage::{MAX_PAGE_LIMIT, Pagination};
use nostr::EventId;

use crate::MarmotMemoryStorage;

impl WelcomeStorage for MarmotMemoryStorage {
    fn save_welcome(&self, welcome: Welcome) -> Result<(), WelcomeError> {
        let mut inner = self.inner.write();
        inner.welcomes.insert(welcome.id, welcome);
        Ok(())
    }

    fn find_welcome_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<Welcome>, WelcomeError> {
        Ok(self.inner.read().welcomes.get(event_id).cloned())
    }

    fn pending_welcomes(
        &self,
        pagination: Option<Pagination>,
    ) -> Result<Vec<Welcome>, WelcomeError> {
        let pagination = pagination.unwrap_or_default();
        let limit = pagination.limit();
        let offset = pagination.offset();
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(WelcomeError::InvalidParameters(format!(
                "limit must be in 1..={MAX_PAGE_LIMIT}, got {limit}"
            )));
        }

        let inner = self.inner.read();
        let mut pending: Vec<Welcome> = inner
            .welcomes
            .values()
            .filter(|welcome| welcome.state == WelcomeState::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.id.cmp(&a.id));
        let start = offset.min(pending.len());
        let end = (offset + limit).min(pending.len());
        Ok(pending[start..end].to_vec())
    }

    fn save_processed_welcome(
        &self,
        processed_welcome: ProcessedWelcome,
    ) -> Result<(), WelcomeError> {
        let mut inner = self.inner.write();
        inner
            .processed_welcomes
            .insert(processed_welcome.wrapper_event_id, processed_welcome);
        Ok(())
    }

    fn find_processed_welcome_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<ProcessedWelcome>, WelcomeError> {
        Ok(self.inner.read().processed_welcomes.get(event_id).cloned())
    }
}
