use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::Channel;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::handler::ClientHandler;
use crate::dial::DownstreamConnection;
use crate::error::BridgeError;

/// The downstream SSH connection and its single reused session channel
/// (§3 invariant 3). Global requests ride `client` directly; `session`
/// is the shared channel for `env`, agent-forward advertisement,
/// subsystem starts, and interactive exec/pty/shell, serialized behind a
/// mutex per the design note on shared downstream sessions. Wrapped in
/// its own `Arc` so an owned lock guard can be held across a spawned
/// task for the life of one interactive channel.
pub struct Downstream {
    pub client: Handle<ClientHandler>,
    pub session: Arc<Mutex<Channel<client::Msg>>>,
    agent_forward_advertised: AtomicBool,
}

impl Downstream {
    pub fn new(conn: DownstreamConnection) -> Self {
        Self {
            client: conn.client,
            session: Arc::new(Mutex::new(conn.session)),
            agent_forward_advertised: AtomicBool::new(false),
        }
    }

    /// Forwards a global request verbatim to the downstream *connection*
    /// (not the session channel — global requests are connection-scoped).
    ///
    /// `russh`'s client handle exposes typed methods for the forwarding
    /// requests rather than a fully generic send-request primitive, so
    /// forwarding is narrowed to the two that matter for port-forwarding
    /// (`tcpip-forward` / `cancel-tcpip-forward`); anything else is
    /// logged and dropped, matching the non-fatal forwarding-error policy.
    pub async fn forward_global_request(&self, name: &str, address: &str, port: u32) -> Option<bool> {
        let result = match name {
            "tcpip-forward" => self.client.tcpip_forward(address, port).await.map(|_| ()),
            "cancel-tcpip-forward" => self.client.cancel_tcpip_forward(address, port).await,
            _ => {
                warn!(request = name, "unsupported global request type, dropping");
                return None;
            }
        };
        match result {
            Ok(_) => Some(true),
            Err(e) => {
                warn!(error = %e, request = name, "global request forwarding failed");
                None
            }
        }
    }

    pub async fn set_env(&self, name: &str, value: &str) -> Result<(), BridgeError> {
        let session = self.session.lock().await;
        session.set_env(false, name, value).await?;
        Ok(())
    }

    /// Advertises agent availability to the remote host over the shared
    /// session. Tolerates being called more than once per the
    /// agent-forward idempotence design note.
    pub async fn advertise_agent_forward(&self) -> Result<(), BridgeError> {
        if self
            .agent_forward_advertised
            .swap(true, Ordering::SeqCst)
        {
            debug!("agent forward already advertised to downstream, skipping duplicate request");
            return Ok(());
        }
        let session = self.session.lock().await;
        session.agent_forward(false).await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        let _ = self
            .client
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
    }
}
