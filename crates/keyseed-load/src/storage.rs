use keyseed_storage::FileKeyStore;
use tracing::debug;

use crate::{app::LoadError, config::Settings};

/// Dial the key store named by the settings (or the platform default).
pub fn dial(settings: &Settings) -> Result<FileKeyStore, LoadError> {
    let root = settings.storage_root()?;
    debug!(?root, "dialing key store");
    Ok(FileKeyStore::dial(root)?)
}
