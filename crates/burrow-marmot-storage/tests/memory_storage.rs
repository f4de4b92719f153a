//! Exercises the full storage surface through the trait bounds, the way
//! the engine consumes it.

use std::collections::BTreeSet;

use burrow_marmot_memory::MarmotMemoryStorage;
use burrow_marmot_storage::groups::GroupStorage;
use burrow_marmot_storage::groups::types::{Group, GroupState};
use burrow_marmot_storage::messages::MessageStorage;
use burrow_marmot_storage::messages::types::{Message, MessageState};
use burrow_marmot_storage::welcomes::WelcomeStorage;
use burrow_marmot_storage::welcomes::types::{Welcome, WelcomeState};
use burrow_marmot_storage::{Backend, GroupId, MarmotStorageProvider, Pagination};
use nostr::{EventId, Kind, PublicKey, RelayUrl, Tags, Timestamp, UnsignedEvent};

fn pubkey() -> PublicKey {
    PublicKey::from_hex("8a9de562cbbed225b6ea0118dd3997a02df92c0bffd2224f71081a7450c3e549")
        .unwrap()
}

fn group(mls_id: &[u8]) -> Group {
    Group {
        mls_group_id: GroupId::from_slice(mls_id),
        nostr_group_id: {
            let mut id = [0u8; 32];
            id[..mls_id.len()].copy_from_slice(mls_id);
            id
        },
        name: "integration".into(),
        description: String::new(),
        admin_pubkeys: BTreeSet::from([pubkey()]),
        last_message_id: None,
        last_message_at: None,
        last_message_processed_at: None,
        epoch: 1,
        state: GroupState::Active,
    }
}

fn message(mls_id: &[u8], id_byte: u8, created_at: u64) -> Message {
    let ca = Timestamp::from(created_at);
    Message {
        id: EventId::from_slice(&[id_byte; 32]).unwrap(),
        pubkey: pubkey(),
        kind: Kind::from(9u16),
        mls_group_id: GroupId::from_slice(mls_id),
        created_at: ca,
        processed_at: ca,
        content: format!("message {id_byte}"),
        tags: Tags::new(),
        event: UnsignedEvent::new(pubkey(), ca, Kind::from(9u16), Tags::new(), String::new()),
        wrapper_event_id: EventId::from_slice(&[0xee; 32]).unwrap(),
        epoch: Some(1),
        state: MessageState::Processed,
    }
}

// Engine-style generic access: everything goes through the provider bound.
fn roundtrip<S: MarmotStorageProvider>(storage: &S) {
    let g = group(&[1, 2, 3]);
    storage.save_group(g.clone()).unwrap();
    assert_eq!(storage.all_groups().unwrap().len(), 1);
    assert_eq!(storage.admins(&g.mls_group_id).unwrap().len(), 1);

    storage
        .replace_group_relays(
            &g.mls_group_id,
            BTreeSet::from([RelayUrl::parse("wss://relay.example.com").unwrap()]),
        )
        .unwrap();
    assert_eq!(storage.group_relays(&g.mls_group_id).unwrap().len(), 1);

    for (byte, ts) in [(1u8, 100u64), (2, 300), (3, 200)] {
        storage.save_message(message(&[1, 2, 3], byte, ts)).unwrap();
    }
    let messages = storage
        .messages(&g.mls_group_id, Some(Pagination::new(Some(2), None)))
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].created_at, Timestamp::from(300u64));

    let last = storage.last_message(&g.mls_group_id).unwrap().unwrap();
    assert_eq!(last.created_at, Timestamp::from(300u64));
}

#[test]
fn memory_provider_round_trip() {
    let storage = MarmotMemoryStorage::new();
    assert_eq!(storage.backend(), Backend::Memory);
    roundtrip(&storage);
}

#[test]
fn welcome_flow_through_provider_bound() {
    let storage = MarmotMemoryStorage::new();
    let welcome = Welcome {
        id: EventId::from_slice(&[7; 32]).unwrap(),
        event: UnsignedEvent::new(
            pubkey(),
            Timestamp::from(100u64),
            Kind::from(444u16),
            Tags::new(),
            String::new(),
        ),
        mls_group_id: GroupId::from_slice(&[1]),
        nostr_group_id: [0u8; 32],
        group_name: "g".into(),
        group_description: String::new(),
        group_admin_pubkeys: vec![pubkey()],
        group_relays: vec![],
        welcomer: pubkey(),
        member_count: 2,
        state: WelcomeState::Pending,
        wrapper_event_id: EventId::from_slice(&[0xdd; 32]).unwrap(),
    };
    storage.save_welcome(welcome.clone()).unwrap();
    assert_eq!(storage.pending_welcomes(None).unwrap().len(), 1);

    let mut accepted = welcome.clone();
    accepted.state = WelcomeState::Accepted;
    storage.save_welcome(accepted).unwrap();
    assert!(storage.pending_welcomes(None).unwrap().is_empty());
    assert_eq!(
        storage
            .find_welcome_by_event_id(&welcome.id)
            .unwrap()
            .unwrap()
            .state,
        WelcomeState::Accepted
    );
}
