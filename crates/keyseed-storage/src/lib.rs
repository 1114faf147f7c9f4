//! Concrete storage backends for keyseed.
//! Keys are kept as one JSON blob per fingerprint, written atomically.

pub mod file_store;

pub use file_store::FileKeyStore;
