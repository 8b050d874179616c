//! Scenario S2: a channel-open request for a type the bridge doesn't
//! support (x11) must be rejected outright rather than silently falling
//! through to a default accept.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_common::{
    AccessPoint, AuditEvent, AuditLog, CollaboratorError, SessionRegistry, SessionService, UserAgent,
};
use bridge_ssh::{BridgeConfig, HostCertificate, HostKeyAuth, Timeouts};
use russh::client::Msg;
use russh::keys::{Algorithm, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::server::{Auth, Msg as ServerMsg, Session};
use russh::Channel;
use tokio::net::TcpListener;

struct AllowAllCollaborator;

#[async_trait]
impl AccessPoint for AllowAllCollaborator {
    async fn resolve_login(&self, _user: &str, _key: &PublicKey) -> Result<String, CollaboratorError> {
        Ok("alice".into())
    }
    async fn check_agent_forward(&self, _login: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[async_trait]
impl AuditLog for AllowAllCollaborator {
    async fn emit_audit_event(&self, _event: AuditEvent) {}
}

#[async_trait]
impl SessionService for AllowAllCollaborator {
    async fn session_metadata(&self, _session_id: &str) -> Option<HashMap<String, String>> {
        None
    }
}

struct StubRegistry;

#[async_trait]
impl SessionRegistry for StubRegistry {
    async fn create_or_join_session(&self, _login: &str, channel_label: String) -> Result<String, CollaboratorError> {
        Ok(channel_label)
    }
    async fn register_resize_subscriber(&self, _session_id: &str, _channel_label: String) {}
}

struct SingleKeyAgent {
    key: PrivateKey,
}

#[async_trait]
impl UserAgent for SingleKeyAgent {
    async fn signers(&self) -> Result<Vec<PrivateKeyWithHashAlg>, CollaboratorError> {
        Ok(vec![PrivateKeyWithHashAlg::new(Arc::new(self.key.clone()), None)])
    }
    async fn serve(&self, _channel: Channel<Msg>) {}
}

struct DownstreamHandler;

impl russh::server::Handler for DownstreamHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(&mut self, _user: &str, _key: &PublicKey) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<ServerMsg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

async fn spawn_downstream_server() -> std::net::SocketAddr {
    let host_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
    let config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let config = config.clone();
            tokio::spawn(async move {
                let _ = russh::server::run_stream(config, socket, DownstreamHandler).await;
            });
        }
    });
    addr
}

struct AcceptAnyHostKey;

impl russh::client::Handler for AcceptAnyHostKey {
    type Error = bridge_ssh::BridgeError;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[tokio::test]
async fn x11_channel_open_is_rejected() {
    let downstream_addr = spawn_downstream_server().await;

    let bridge_host_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
    let client_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
    let host_key_auth: HostKeyAuth = Arc::new(|_key| Ok(()));

    let config = BridgeConfig {
        auth_client: Arc::new(AllowAllCollaborator),
        session_registry: Arc::new(StubRegistry),
        user_agent: Arc::new(SingleKeyAgent { key: client_key.clone() }),
        source: "test-upstream:0".into(),
        destination: downstream_addr.to_string(),
        host_certificate: HostCertificate::new(bridge_host_key),
        host_key_auth,
        timeouts: Timeouts::default(),
    };

    let mut bridge = bridge_ssh::Bridge::new(config).expect("valid config");
    let client_pipe = bridge.dial();
    tokio::spawn(async move {
        let _ = bridge.serve().await;
    });

    let client_config = Arc::new(russh::client::Config::default());
    let mut session = russh::client::connect_stream(client_config, client_pipe, AcceptAnyHostKey)
        .await
        .expect("upstream handshake");

    let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(client_key), None);
    let auth = session
        .authenticate_publickey("alice", key_with_alg)
        .await
        .expect("auth request sent");
    assert!(auth.success());

    let result = session.channel_open_x11("127.0.0.1", 0).await;
    assert!(result.is_err(), "x11 channel open should have been rejected");

    // A normal session channel must still work on the same connection,
    // confirming the rejection didn't tear down the whole bridge.
    let channel = session.channel_open_session().await;
    assert!(channel.is_ok(), "session channel should still open after an unsupported channel type was rejected");
}
