//! Decryption with epoch fallback
//!
//! A wrapper may have been encrypted under an exporter secret from an epoch
//! the group has since moved past. Decryption tries the current epoch first
//! and then walks back through retained past epochs, newest to oldest.

use burrow_marmot_storage::groups::types as group_types;
use burrow_marmot_storage::{GroupId, MarmotStorageProvider};
use nostr::Event;
use openmls::prelude::MlsGroup;

use crate::error::Error;
use crate::{Marmot, util};

use super::Result;

impl<Storage> Marmot<Storage>
where
    Storage: MarmotStorageProvider,
{
    /// Loads the group and decrypts the wrapper content
    ///
    /// Incoming wrappers only carry the Nostr group ID in their h tag, so
    /// the group is looked up by that rather than the MLS group ID.
    pub(super) fn decrypt_message(
        &self,
        nostr_group_id: [u8; 32],
        event: &Event,
    ) -> Result<(group_types::Group, MlsGroup, Vec<u8>)> {
        let group = self
            .storage()
            .find_group_by_nostr_group_id(&nostr_group_id)
            .map_err(|_e| Error::Group("Storage error while finding group".to_string()))?
            .ok_or(Error::GroupNotFound)?;

        let mls_group: MlsGroup = self
            .load_mls_group(&group.mls_group_id)
            .map_err(|_e| Error::Group("Storage error while loading MLS group".to_string()))?
            .ok_or(Error::GroupNotFound)?;

        let message_bytes: Vec<u8> =
            self.try_decrypt_with_recent_epochs(&mls_group, &event.content)?;

        Ok((group, mls_group, message_bytes))
    }

    /// Tries past epochs' exporter secrets, newest first
    ///
    /// Only secrets still retained in storage are tried. A message older
    /// than the retention window cannot be recovered.
    fn try_decrypt_with_past_epochs(
        &self,
        mls_group: &MlsGroup,
        encrypted_content: &str,
        max_epoch_lookback: u64,
    ) -> Result<Vec<u8>> {
        let group_id: GroupId = mls_group.group_id().into();
        let current_epoch: u64 = mls_group.epoch().as_u64();

        // No past epochs exist at epoch 0 or with a zero lookback
        if current_epoch == 0 || max_epoch_lookback == 0 {
            return Err(Error::StaleMessage);
        }

        // Inclusive range of exactly max_epoch_lookback epochs ending one
        // below the current epoch
        let start_epoch: u64 = current_epoch.saturating_sub(1);
        let end_epoch: u64 = start_epoch.saturating_sub(max_epoch_lookback.saturating_sub(1));

        for epoch in (end_epoch..=start_epoch).rev() {
            tracing::debug!(
                target: "burrow_marmot::messages::try_decrypt_with_past_epochs",
                "Trying to decrypt with epoch {}",
                epoch
            );

            match self.storage().get_group_exporter_secret(&group_id, epoch) {
                Ok(Some(secret)) => {
                    match util::decrypt_with_exporter_secret(&secret, encrypted_content) {
                        Ok(decrypted_bytes) => {
                            tracing::debug!(
                                target: "burrow_marmot::messages::try_decrypt_with_past_epochs",
                                "Successfully decrypted message with epoch {}",
                                epoch
                            );
                            return Ok(decrypted_bytes);
                        }
                        Err(e) => {
                            tracing::trace!(
                                target: "burrow_marmot::messages::try_decrypt_with_past_epochs",
                                "Failed to decrypt with epoch {}: {:?}",
                                epoch,
                                e
                            );
                        }
                    }
                }
                Ok(None) => {
                    tracing::trace!(
                        target: "burrow_marmot::messages::try_decrypt_with_past_epochs",
                        "No exporter secret found for epoch {}",
                        epoch
                    );
                }
                Err(_e) => {
                    return Err(Error::Group(
                        "Storage error while finding exporter secret".to_string(),
                    ));
                }
            }
        }

        Err(Error::StaleMessage)
    }

    /// Decrypts with the current exporter secret, falling back to past
    /// epochs within the retention window.
    pub(super) fn try_decrypt_with_recent_epochs(
        &self,
        mls_group: &MlsGroup,
        encrypted_content: &str,
    ) -> Result<Vec<u8>> {
        let secret = self.exporter_secret(&mls_group.group_id().into())?;

        match util::decrypt_with_exporter_secret(&secret, encrypted_content) {
            Ok(decrypted_bytes) => {
                tracing::debug!("Successfully decrypted message with current exporter secret");
                Ok(decrypted_bytes)
            }
            Err(_) => {
                tracing::debug!(
                    "Failed to decrypt message with current exporter secret. Trying with past ones."
                );

                self.try_decrypt_with_past_epochs(
                    mls_group,
                    encrypted_content,
                    self.config.exporter_secret_retention,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use nostr::Keys;
    use openmls::prelude::MlsGroup;

    use crate::error::Error;
    use crate::test_util::{create_nostr_group_config_data, create_test_rumor};
    use crate::tests::create_test_marmot;

    #[test]
    fn test_past_epoch_decryption_guards_epoch_zero() {
        let alice_keys = Keys::generate();
        let alice_marmot = create_test_marmot();

        // A single-member group stays at epoch 0 after creation
        let create_result = alice_marmot
            .create_group(
                &alice_keys.public_key(),
                vec![],
                create_nostr_group_config_data(vec![alice_keys.public_key()]),
            )
            .expect("Should create group");

        let group_id = create_result.group.mls_group_id.clone();

        let mls_group: MlsGroup = alice_marmot
            .load_mls_group(&group_id)
            .expect("Should load group")
            .expect("Group should exist");
        assert_eq!(mls_group.epoch().as_u64(), 0);

        let result =
            alice_marmot.try_decrypt_with_past_epochs(&mls_group, "invalid_encrypted_content", 5);
        assert!(matches!(result.unwrap_err(), Error::StaleMessage));
    }

    #[test]
    fn test_past_epoch_decryption_guards_zero_lookback() {
        let alice_keys = Keys::generate();
        let alice_marmot = create_test_marmot();

        let create_result = alice_marmot
            .create_group(
                &alice_keys.public_key(),
                vec![],
                create_nostr_group_config_data(vec![alice_keys.public_key()]),
            )
            .expect("Should create group");

        let group_id = create_result.group.mls_group_id.clone();

        // Advance a few epochs
        for _ in 0..3 {
            let update = alice_marmot.self_update(&group_id).expect("Should update");
            alice_marmot
                .process_message(&update.evolution_event)
                .expect("Should process update");
            alice_marmot
                .merge_pending_commit(&group_id)
                .expect("Should merge");
        }

        let mls_group: MlsGroup = alice_marmot
            .load_mls_group(&group_id)
            .expect("Should load group")
            .expect("Group should exist");
        assert!(mls_group.epoch().as_u64() > 1);

        let result =
            alice_marmot.try_decrypt_with_past_epochs(&mls_group, "invalid_encrypted_content", 0);
        assert!(matches!(result.unwrap_err(), Error::StaleMessage));
    }

    #[test]
    fn test_message_from_previous_epoch_still_decrypts() {
        let alice_keys = Keys::generate();
        let alice_marmot = create_test_marmot();

        let create_result = alice_marmot
            .create_group(
                &alice_keys.public_key(),
                vec![],
                create_nostr_group_config_data(vec![alice_keys.public_key()]),
            )
            .expect("Should create group");

        let group_id = create_result.group.mls_group_id.clone();

        // Encrypt a wrapper at the current epoch
        let rumor = create_test_rumor(&alice_keys, "from an older epoch");
        let old_wrapper = alice_marmot
            .create_message(&group_id, rumor)
            .expect("Should create message");

        // Advance one epoch, then decrypt the old wrapper
        let update = alice_marmot.self_update(&group_id).expect("Should update");
        alice_marmot
            .process_message(&update.evolution_event)
            .expect("Should process update");
        alice_marmot
            .merge_pending_commit(&group_id)
            .expect("Should merge");

        let mls_group: MlsGroup = alice_marmot
            .load_mls_group(&group_id)
            .expect("Should load group")
            .expect("Group should exist");

        let bytes = alice_marmot
            .try_decrypt_with_recent_epochs(&mls_group, &old_wrapper.content)
            .expect("Previous epoch secret should still decrypt the wrapper");
        assert!(!bytes.is_empty());
    }
}
