//! Persistent storage for meshid.
//!
//! The fingerprint registry and datapoint translation table are kept in a
//! single redb file. See [`FingerprintStore`].

pub mod error;
pub mod fingerprint_store;

pub use error::{Error, Result};
pub use fingerprint_store::FingerprintStore;
