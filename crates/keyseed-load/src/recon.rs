use std::sync::Arc;

use keyseed_core::storage::KeyStore;
use keyseed_recon::SksPeer;
use tracing::debug;

use crate::{app::LoadError, config::Settings};

/// Construct the reconciliation peer over an already dialed store.
pub fn peer_from_settings<S: KeyStore>(
    store: Arc<S>,
    settings: &Settings,
) -> Result<SksPeer<S>, LoadError> {
    let path = settings.recon_path()?;
    debug!(?path, "starting recon peer");
    Ok(SksPeer::new(store, &path, &settings.recon_settings())?)
}

#[cfg(test)]
mod tests {
    use keyseed_core::storage::InMemoryKeyStore;
    use keyseed_recon::{ReconSettings, StatsPeer};

    use super::*;

    fn settings_with(path: std::path::PathBuf, partners: &[&str]) -> Settings {
        Settings {
            recon: Some(ReconSettings {
                path: Some(path),
                partners: partners.iter().map(|p| p.to_string()).collect(),
            }),
            ..Settings::default()
        }
    }

    #[test]
    fn builds_peer_at_configured_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recon");
        let peer = peer_from_settings(
            Arc::new(InMemoryKeyStore::new()),
            &settings_with(path.clone(), &["a.example.org:11370"]),
        )
        .expect("peer");
        assert_eq!(peer.name(), "sks");
        assert_eq!(peer.stats_path(), path.join(keyseed_recon::STATS_FILE));
        assert_eq!(peer.partners(), ["a.example.org:11370"]);
    }

    #[test]
    fn bad_partner_is_a_peer_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = peer_from_settings(
            Arc::new(InMemoryKeyStore::new()),
            &settings_with(dir.path().to_path_buf(), &["no-port"]),
        )
        .err()
        .expect("peer construction should fail");
        assert!(matches!(err, LoadError::Peer(_)));
    }
}
