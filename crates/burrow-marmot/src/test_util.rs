//! Shared test utilities
//!
//! Helpers used across the test modules for common group setup.

use burrow_marmot_storage::GroupId;
use burrow_marmot_storage::MarmotStorageProvider;
use nostr::{Event, EventBuilder, Keys, Kind, PublicKey, RelayUrl};

use crate::Marmot;
use crate::groups::NostrGroupConfigData;

/// Creates test group members with standard configuration
///
/// Returns a tuple of (creator_keys, member_keys_vec, admin_pubkeys_vec)
/// where the creator and first member are admins.
pub fn create_test_group_members() -> (Keys, Vec<Keys>, Vec<PublicKey>) {
    let creator = Keys::generate();
    let member1 = Keys::generate();
    let member2 = Keys::generate();

    let creator_pk = creator.public_key();
    let members = vec![member1, member2];
    let admins = vec![creator_pk, members[0].public_key()];

    (creator, members, admins)
}

/// Creates a signed key package event for a member
pub fn create_key_package_event<Storage>(marmot: &Marmot<Storage>, member_keys: &Keys) -> Event
where
    Storage: MarmotStorageProvider,
{
    let relays = vec![RelayUrl::parse("wss://test.relay").unwrap()];
    let (key_package_hex, tags, _hash_ref) = marmot
        .create_key_package_for_event(&member_keys.public_key(), relays)
        .expect("Failed to create key package");

    EventBuilder::new(Kind::MlsKeyPackage, key_package_hex)
        .tags(tags)
        .sign_with_keys(member_keys)
        .expect("Failed to sign event")
}

/// Creates standard test group configuration data
pub fn create_nostr_group_config_data(admins: Vec<PublicKey>) -> NostrGroupConfigData {
    let relays = vec![RelayUrl::parse("wss://test.relay").unwrap()];
    let name = "Test Group".to_owned();
    let description = "A test group for basic testing".to_owned();
    NostrGroupConfigData::new(name, description, relays, admins)
}

/// Creates a complete test group and returns the group ID
///
/// Key package events for the members are generated on the same instance,
/// and the creation commit is merged by `create_group` itself.
pub fn create_test_group<Storage>(
    marmot: &Marmot<Storage>,
    creator: &Keys,
    members: &[Keys],
    admins: &[PublicKey],
) -> GroupId
where
    Storage: MarmotStorageProvider,
{
    let creator_pk = creator.public_key();

    let mut initial_key_package_events = Vec::new();
    for member_keys in members {
        let key_package_event = create_key_package_event(marmot, member_keys);
        initial_key_package_events.push(key_package_event);
    }

    let create_result = marmot
        .create_group(
            &creator_pk,
            initial_key_package_events,
            create_nostr_group_config_data(admins.to_vec()),
        )
        .expect("Failed to create group");

    create_result.group.mls_group_id.clone()
}

/// Creates a test message rumor (unsigned event)
pub fn create_test_rumor(sender_keys: &Keys, content: &str) -> nostr::UnsignedEvent {
    EventBuilder::new(Kind::TextNote, content).build(sender_keys.public_key())
}
