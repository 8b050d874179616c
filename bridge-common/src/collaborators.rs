use std::collections::HashMap;

use async_trait::async_trait;
use russh::client::Msg;
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use russh::Channel;

use crate::error::CollaboratorError;

/// A forwarded authentication agent. Its signers are consulted once at
/// dial time to authenticate the downstream handshake, and the agent may
/// later be served remotely if agent forwarding is requested.
#[async_trait]
pub trait UserAgent: Send + Sync {
    async fn signers(&self) -> Result<Vec<PrivateKeyWithHashAlg>, CollaboratorError>;

    /// Pipes the raw `auth-agent@openssh.com` channel protocol to the
    /// real agent backing this collaborator (e.g. the client's forwarded
    /// `SSH_AUTH_SOCK`). Consumes the channel for its entire lifetime.
    async fn serve(&self, channel: Channel<Msg>);
}

/// A single structured audit record.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub kind: &'static str,
    pub fields: HashMap<String, String>,
}

impl AuditEvent {
    pub fn port_forward(
        target_addr: impl Into<String>,
        login: impl Into<String>,
        local_addr: impl Into<String>,
        remote_addr: impl Into<String>,
    ) -> Self {
        let mut fields = HashMap::new();
        fields.insert("port_forward_addr".into(), target_addr.into());
        fields.insert("login".into(), login.into());
        fields.insert("local_addr".into(), local_addr.into());
        fields.insert("remote_addr".into(), remote_addr.into());
        Self {
            kind: "port_forward",
            fields,
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn emit_audit_event(&self, event: AuditEvent);
}

/// Identity, CA, role, and cluster-config lookups used by the auth handlers.
#[async_trait]
pub trait AccessPoint: Send + Sync {
    /// Resolves the presented username and public key/certificate to the
    /// downstream system login, applying cluster RBAC. Implementations
    /// validate `key` itself (CA signature, principal list, expiry) rather
    /// than trusting `user` alone; returns an access-denied error if the
    /// identity has no usable login for the requested target.
    async fn resolve_login(&self, user: &str, key: &PublicKey) -> Result<String, CollaboratorError>;

    /// Policy check consulted before serving agent forwarding to a
    /// resolved login.
    async fn check_agent_forward(&self, login: &str) -> Result<(), CollaboratorError>;
}

/// Interactive session metadata and party membership, out of scope for
/// the bridge itself beyond lookups performed during dispatch.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn session_metadata(&self, session_id: &str) -> Option<HashMap<String, String>>;
}

/// Tracks interactive sessions and fans out terminal-resize notifications
/// to every party joined to a session.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Attaches a channel to a session record, possibly joining an
    /// existing multi-party session, and returns the session id.
    async fn create_or_join_session(
        &self,
        login: &str,
        channel_label: String,
    ) -> Result<String, CollaboratorError>;

    /// Registers `channel_label` as a subscriber of terminal-size
    /// notifications for `session_id`. The registry owns cadence and
    /// content of the pushes.
    async fn register_resize_subscriber(&self, session_id: &str, channel_label: String);
}

/// The capability bundle a [`BridgeConfig`](../bridge_ssh/struct.BridgeConfig.html)
/// is constructed with: audit-log sink, policy access point, and session
/// service, bundled because the recording proxy hands them off together.
pub trait AuthClient: AccessPoint + AuditLog + SessionService {}
impl<T: AccessPoint + AuditLog + SessionService> AuthClient for T {}
