//! Core abstractions for keyseed: the key record model, the streaming packet
//! decoder and the key storage contract.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod keys;
pub mod storage;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
