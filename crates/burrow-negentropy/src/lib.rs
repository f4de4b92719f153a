//! NIP-77 negentropy set reconciliation
//!
//! The session engine computes, over an abstract datasource, the symmetric
//! difference between two peers' event sets. Range fingerprints narrow the
//! search by prefix-bit splitting; small ranges resolve through explicit id
//! lists. The whole exchange is bounded by per-message range caps, id-list
//! caps and a round-trip budget.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod bound;
pub mod datasource;
pub mod error;
pub mod fingerprint;
pub mod message;
pub mod session;
pub mod varint;

pub use self::bound::{Bound, Prefix};
pub use self::datasource::{Datasource, Item, VecDatasource};
pub use self::error::Error;
pub use self::fingerprint::Accumulator;
pub use self::message::{Payload, Range};
pub use self::session::{Session, SessionOptions, Stats};
