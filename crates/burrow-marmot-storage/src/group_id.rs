//! Newtype over the OpenMLS group id.

use serde::{Deserialize, Serialize};

/// MLS group identifier. Wraps the OpenMLS id so storage backends and the
/// engine share one key type without leaking `openmls` through every
/// signature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(openmls::group::GroupId);

impl GroupId {
    /// Builds a group id from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(openmls::group::GroupId::from_slice(bytes))
    }

    /// Raw bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Owned raw bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Borrow of the wrapped OpenMLS id.
    pub fn inner(&self) -> &openmls::group::GroupId {
        &self.0
    }
}

impl From<openmls::group::GroupId> for GroupId {
    fn from(id: openmls::group::GroupId) -> Self {
        Self(id)
    }
}

impl From<&openmls::group::GroupId> for GroupId {
    fn from(id: &openmls::group::GroupId) -> Self {
        Self(id.clone())
    }
}

impl From<GroupId> for openmls::group::GroupId {
    fn from(id: GroupId) -> Self {
        id.0
    }
}

impl From<&GroupId> for openmls::group::GroupId {
    fn from(id: &GroupId) -> Self {
        id.0.clone()
    }
}
