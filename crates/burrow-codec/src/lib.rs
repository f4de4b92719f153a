//! Nostr wire codecs shared across the burrow stack
//!
//! Events, filters and ingest envelopes as they cross process boundaries:
//! parsing, canonical serialization, id hashing and predicate matching. The
//! store and the negentropy and MLS layers all speak through these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod envelope;
pub mod error;
pub mod event;
pub mod filter;
pub mod hex_util;
pub mod magnet;

#[cfg(feature = "test-support")]
pub use self::event::test_support;

pub use self::error::Error;
pub use self::event::Event;
pub use self::filter::Filter;
pub use self::magnet::MagnetUri;
