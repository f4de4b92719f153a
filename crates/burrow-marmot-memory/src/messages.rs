//! `MessageStorage` over the in-memory maps.

use burrow_marmot_storage::GroupId;
use burrow_marmot_storage::messages::types::{Message, ProcessedMessage, ProcessedMessageState};
use burrow_marmot_storage::messages::{MessageError, MessageStorage};
use nostr::EventId;

use crate::MarmotMemoryStorage;

impl MessageStorage for MarmotMemoryStorage {
    fn save_message(&self, message: Message) -> Result<(), MessageError> {
        let mut inner = self.inner.write();
        inner
            .messages
            .entry(message.mls_group_id.clone())
            .or_default()
            .insert(message.id, message);
        Ok(())
    }

    fn find_message_by_event_id(
        &self,
        mls_group_id: &GroupId,
        event_id: &EventId,
    ) -> Result<Option<Message>, MessageError> {
        Ok(self
            .inner
            .read()
            .messages
            .get(mls_group_id)
            .and_then(|by_id| by_id.get(event_id))
            .cloned())
    }

    fn save_processed_message(
        &self,
        processed_message: ProcessedMessage,
    ) -> Result<(), MessageError> {
        let mut inner = self.inner.write();
        inner
            .processed_messages
            .insert(processed_message.wrapper_event_id, processed_message);
        Ok(())
    }

    fn find_processed_message_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<ProcessedMessage>, MessageError> {
        Ok(self.inner.read().processed_messages.get(event_id).cloned())
    }

    fn find_retryable_messages(&self, group_id: &GroupId) -> Result<Vec<EventId>, MessageError> {
        let inner = self.inner.read();
        let mut ids: Vec<EventId> = inner
            .processed_messages
            .values()
            .filter(|record| {
                record.state == ProcessedMessageState::Retryable
                    && record.mls_group_id.as_ref() == Some(group_id)
            })
            .map(|record| record.wrapper_event_id)
            .collect();
        // Oldest first so retries replay in arrival order.
        ids.sort_by_key(|id| {
            inner
                .processed_messages
                .get(id)
                .map(|record| record.processed_at)
        });
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use burrow_marmot_storage::messages::types::MessageState;
    use nostr::{Kind, PublicKey, Tags, Timestamp, UnsignedEvent};

    use super::*;

    fn test_message(group: &[u8], id_byte: u8) -> Message {
        let pubkey = PublicKey::from_hex(
            "8a9de562cbbed225b6ea0118dd3997a02df92c0bffd2224f71081a7450c3e549",
        )
        .unwrap();
        let ca = Timestamp::from(100u64);
        Message {
            id: EventId::from_slice(&[id_byte; 32]).unwrap(),
            pubkey,
            kind: Kind::from(9u16),
            mls_group_id: GroupId::from_slice(group),
            created_at: ca,
            processed_at: ca,
            content: "hi".into(),
            tags: Tags::new(),
            event: UnsignedEvent::new(pubkey, ca, Kind::from(9u16), Tags::new(), "hi"),
            wrapper_event_id: EventId::from_slice(&[0xee; 32]).unwrap(),
            epoch: Some(1),
            state: MessageState::Processed,
        }
    }

    fn retryable(group: &[u8], wrapper_byte: u8, processed_at: u64) -> ProcessedMessage {
        ProcessedMessage {
            wrapper_event_id: EventId::from_slice(&[wrapper_byte; 32]).unwrap(),
            message_event_id: None,
            processed_at: Timestamp::from(processed_at),
            epoch: Some(7),
            mls_group_id: Some(GroupId::from_slice(group)),
            state: ProcessedMessageState::Retryable,
            failure_reason: None,
        }
    }

    #[test]
    fn messages_are_scoped_by_group() {
        let storage = MarmotMemoryStorage::new();
        let msg = test_message(&[1], 5);
        storage.save_message(msg.clone()).unwrap();

        let found = storage
            .find_message_by_event_id(&GroupId::from_slice(&[1]), &msg.id)
            .unwrap();
        assert_eq!(found, Some(msg.clone()));
        // Same event id, different group: no hit.
        let other = storage
            .find_message_by_event_id(&GroupId::from_slice(&[2]), &msg.id)
            .unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn retryable_lookup_filters_group_and_state() {
        let storage = MarmotMemoryStorage::new();
        storage.save_processed_message(retryable(&[1], 0x10, 200)).unwrap();
        storage.save_processed_message(retryable(&[1], 0x20, 100)).unwrap();
        storage.save_processed_message(retryable(&[2], 0x30, 50)).unwrap();
        let mut failed = retryable(&[1], 0x40, 10);
        failed.state = ProcessedMessageState::Failed;
        storage.save_processed_message(failed).unwrap();

        let ids = storage
            .find_retryable_messages(&GroupId::from_slice(&[1]))
            .unwrap();
        assert_eq!(
            ids,
            vec![
                EventId::from_slice(&[0x20; 32]).unwrap(),
                EventId::from_slice(&[0x10; 32]).unwrap(),
            ]
        );
    }
}
