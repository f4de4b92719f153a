//! Engine errors

use std::string::FromUtf8Error;
use std::{fmt, str};

use nostr::nips::nip44;
use nostr::types::url;
use nostr::{Kind, event, key};
use openmls::credentials::errors::BasicCredentialError;
use openmls::error::LibraryError;
use openmls::extensions::errors::InvalidExtensionError;
use openmls::framing::errors::ProtocolMessageError;
use openmls::group::{
    AddMembersError, CreateMessageError, ExportSecretError, MergePendingCommitError, NewGroupError,
    ProcessMessageError, SelfUpdateError, WelcomeError,
};
use openmls::key_packages::errors::{KeyPackageNewError, KeyPackageVerifyError};
use openmls::prelude::{MlsGroupStateError, ValidationError};
use openmls_traits::types::CryptoError;

/// Marmot engine error
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Hex error
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// Keys error
    #[error(transparent)]
    Keys(#[from] key::Error),
    /// Event error
    #[error(transparent)]
    Event(#[from] event::Error),
    /// Event builder error
    #[error(transparent)]
    EventBuilder(#[from] event::builder::Error),
    /// NIP-44 error
    #[error(transparent)]
    Nip44(#[from] nip44::Error),
    /// Relay URL error
    #[error(transparent)]
    RelayUrl(#[from] url::Error),
    /// TLS codec error
    #[error(transparent)]
    Tls(#[from] tls_codec::Error),
    /// UTF-8 error
    #[error(transparent)]
    Utf8(#[from] str::Utf8Error),
    /// Crypto error
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Generic OpenMLS error
    #[error(transparent)]
    OpenMlsGeneric(#[from] LibraryError),
    /// Invalid extension error
    #[error(transparent)]
    InvalidExtension(#[from] InvalidExtensionError),
    /// Create message error
    #[error(transparent)]
    CreateMessage(#[from] CreateMessageError),
    /// Export secret error
    #[error(transparent)]
    ExportSecret(#[from] ExportSecretError),
    /// Basic credential error
    #[error(transparent)]
    BasicCredential(#[from] BasicCredentialError),
    /// Message epoch differs from the group's epoch
    #[error("message epoch differs from the group's epoch")]
    WrongEpoch(u64),
    /// Message group ID mismatch reported by MLS validation
    #[error("wrong group ID")]
    WrongGroupId,
    /// Group was left or the local member was evicted
    #[error("use after eviction")]
    UseAfterEviction,
    /// Message is from a future epoch beyond the forward distance
    #[error("message epoch {message_epoch} is too far ahead of group epoch {group_epoch}")]
    ForwardFromFuture {
        /// Epoch of the received ciphertext
        message_epoch: u64,
        /// Current epoch of the local group
        group_epoch: u64,
    },
    /// Message is older than the retained epoch secrets
    #[error("message is older than the retained epoch secrets")]
    StaleMessage,
    /// Other MLS message processing error
    #[error("{0}")]
    ProcessMessageOther(String),
    /// Protocol message error
    #[error("{0}")]
    ProtocolMessage(String),
    /// Key package error
    #[error("{0}")]
    KeyPackage(String),
    /// Group error
    #[error("{0}")]
    Group(String),
    /// Exporter secret is not a valid secp256k1 scalar
    #[error("group exporter secret is not a valid key")]
    GroupExporterSecret,
    /// Message error
    #[error("{0}")]
    Message(String),
    /// Cannot decrypt own message
    #[error("cannot decrypt own message")]
    CannotDecryptOwnMessage,
    /// Merge pending commit error
    #[error("{0}")]
    MergePendingCommit(String),
    /// Self update error
    #[error("{0}")]
    SelfUpdate(String),
    /// Welcome error
    #[error("{0}")]
    Welcome(String),
    /// Welcome previously failed to process (retries are not supported)
    #[error("welcome previously failed to process: {0}")]
    WelcomePreviouslyFailed(String),
    /// Provider error
    #[error("{0}")]
    Provider(String),
    /// Group not found
    #[error("group not found")]
    GroupNotFound,
    /// Protocol message group ID doesn't match the current group ID
    #[error("protocol message group ID doesn't match the current group ID")]
    ProtocolGroupIdMismatch,
    /// Own leaf not found
    #[error("own leaf not found")]
    OwnLeafNotFound,
    /// Failed to load signer
    #[error("can't load signer")]
    CantLoadSigner,
    /// Invalid welcome message
    #[error("invalid welcome message")]
    InvalidWelcomeMessage,
    /// Unexpected event kind
    #[error("unexpected event kind: expected={expected}, received={received}")]
    UnexpectedEvent {
        /// Expected event kind
        expected: Kind,
        /// Received event kind
        received: Kind,
    },
    /// Unexpected extension type
    #[error("unexpected extension type")]
    UnexpectedExtensionType,
    /// Nostr group data extension not found
    #[error("nostr group data extension not found")]
    GroupDataExtensionNotFound,
    /// Invalid extension version
    #[error("invalid extension version: {0}")]
    InvalidExtensionVersion(u16),
    /// Extension format error
    #[error("extension format error: {0}")]
    ExtensionFormat(String),
    /// Rumor pubkey does not match MLS sender credential
    #[error("author mismatch: rumor pubkey does not match MLS sender")]
    AuthorMismatch,
    /// Key package credential identity doesn't match the event signer
    #[error(
        "key package identity mismatch: credential identity {credential_identity} doesn't match event signer {event_signer}"
    )]
    KeyPackageIdentityMismatch {
        /// The identity claimed in the BasicCredential
        credential_identity: String,
        /// The public key that signed the event
        event_signer: String,
    },
    /// Identity change attempted in a proposal or commit
    #[error(
        "identity change not allowed: attempted change from {original_identity} to {new_identity}"
    )]
    IdentityChangeNotAllowed {
        /// The original identity of the member
        original_identity: String,
        /// The new identity attempted
        new_identity: String,
    },
    /// Commit message received from a non-admin
    #[error("not processing commit from non-admin")]
    CommitFromNonAdmin,
    /// Message received from a sender that is not a group member
    #[error("message from non-member sender")]
    MessageFromNonMember,
    /// Own commit pending merge
    #[error("own commit pending merge")]
    OwnCommitPending,
    /// Rumor event is missing its ID
    #[error("rumor event is missing its ID")]
    MissingRumorEventId,
    /// Event timestamp is outside the accepted window
    #[error("event timestamp is invalid: {0}")]
    InvalidTimestamp(String),
    /// Missing required group ID tag
    #[error("missing required group ID tag (h tag)")]
    MissingGroupIdTag,
    /// Invalid group ID format in tag
    #[error("invalid group ID format: {0}")]
    InvalidGroupIdFormat(String),
    /// Multiple group ID tags found where exactly one is required
    #[error("multiple group ID tags found: expected exactly one h tag, found {0}")]
    MultipleGroupIdTags(usize),
}

impl From<FromUtf8Error> for Error {
    fn from(e: FromUtf8Error) -> Self {
        Self::Utf8(e.utf8_error())
    }
}

impl From<ProtocolMessageError> for Error {
    fn from(e: ProtocolMessageError) -> Self {
        Self::ProtocolMessage(e.to_string())
    }
}

impl From<KeyPackageNewError> for Error {
    fn from(e: KeyPackageNewError) -> Self {
        Self::KeyPackage(e.to_string())
    }
}

impl From<KeyPackageVerifyError> for Error {
    fn from(e: KeyPackageVerifyError) -> Self {
        Self::KeyPackage(e.to_string())
    }
}

impl<T> From<NewGroupError<T>> for Error
where
    T: fmt::Display,
{
    fn from(e: NewGroupError<T>) -> Self {
        Self::Group(e.to_string())
    }
}

impl<T> From<AddMembersError<T>> for Error
where
    T: fmt::Display,
{
    fn from(e: AddMembersError<T>) -> Self {
        Self::Group(e.to_string())
    }
}

impl<T> From<MergePendingCommitError<T>> for Error
where
    T: fmt::Display,
{
    fn from(e: MergePendingCommitError<T>) -> Self {
        Self::MergePendingCommit(e.to_string())
    }
}

impl<T> From<SelfUpdateError<T>> for Error
where
    T: fmt::Display,
{
    fn from(e: SelfUpdateError<T>) -> Self {
        Self::SelfUpdate(e.to_string())
    }
}

impl<T> From<WelcomeError<T>> for Error
where
    T: fmt::Display,
{
    fn from(e: WelcomeError<T>) -> Self {
        Self::Welcome(e.to_string())
    }
}

impl<T> From<ProcessMessageError<T>> for Error
where
    T: fmt::Display,
{
    fn from(e: ProcessMessageError<T>) -> Self {
        match e {
            ProcessMessageError::ValidationError(validation_error) => match validation_error {
                ValidationError::WrongGroupId => Self::WrongGroupId,
                ValidationError::CannotDecryptOwnMessage => Self::CannotDecryptOwnMessage,
                _ => Self::ProcessMessageOther(validation_error.to_string()),
            },
            ProcessMessageError::GroupStateError(group_state_error) => match group_state_error {
                MlsGroupStateError::UseAfterEviction => Self::UseAfterEviction,
                _ => Self::ProcessMessageOther(group_state_error.to_string()),
            },
            _ => Self::ProcessMessageOther(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_message_error_mapping() {
        let error: Error = ProcessMessageError::<std::convert::Infallible>::GroupStateError(
            MlsGroupStateError::UseAfterEviction,
        )
        .into();
        assert_eq!(error, Error::UseAfterEviction);

        let error: Error = ProcessMessageError::<std::convert::Infallible>::ValidationError(
            ValidationError::WrongGroupId,
        )
        .into();
        assert_eq!(error, Error::WrongGroupId);
    }

    #[test]
    fn test_error_display() {
        let error = Error::ForwardFromFuture {
            message_epoch: 12,
            group_epoch: 3,
        };
        assert_eq!(
            error.to_string(),
            "message epoch 12 is too far ahead of group epoch 3"
        );

        assert_eq!(Error::GroupNotFound.to_string(), "group not found");
    }
}
