//! Cryptographic utilities for Viera television communication.
//!
//! Newer Viera firmware protects most remote-control actions with a
//! proprietary envelope:
//!
//! - [`envelope`]: AES-128-CBC sealing with an HMAC-SHA-256 trailer
//! - [`keys`]: IV permutations producing the working keys for a paired
//!   session and for the one-shot PIN challenge

pub mod envelope;
pub mod keys;

pub use envelope::{open, seal};
pub use keys::{SessionKeys, derive_challenge_keys, derive_session_keys};
