use std::sync::Arc;
use std::time::Duration;

use bridge_common::UserAgent;
use russh::client::{self, Handle};
use russh::{Channel, ChannelMsg};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument};

use crate::client::handler::{ClientHandler, ClientHandlerEvent};
use crate::config::{HostKeyAuth, Timeouts};
use crate::error::BridgeError;
use crate::idle_timeout::IdleTimeoutIo;

/// Result of a successful downstream dial: the live client connection and
/// the single session channel opened on it, reused for every
/// connection-scoped bridge operation (§4.D of the design).
pub struct DownstreamConnection {
    pub client: Handle<ClientHandler>,
    pub session: Channel<client::Msg>,
}

/// Opens the downstream SSH connection: TCP-dial with a timeout, wrap in
/// an idle-timeout guard, run the client handshake authenticating with
/// the forwarded agent's dynamically enumerated signers, then open the
/// one session channel the bridge will reuse.
#[instrument(skip(user_agent, host_key_auth, client_events_tx), fields(destination = %destination))]
pub async fn dial(
    destination: &str,
    system_login: &str,
    user_agent: &Arc<dyn UserAgent>,
    host_key_auth: HostKeyAuth,
    timeouts: Timeouts,
    client_events_tx: UnboundedSender<ClientHandlerEvent>,
) -> Result<DownstreamConnection, BridgeError> {
    let signers = user_agent
        .signers()
        .await
        .map_err(BridgeError::from)?;
    if signers.is_empty() {
        return Err(BridgeError::AccessDenied("agent must be forwarded".into()));
    }

    let tcp = tokio::time::timeout(timeouts.dial, TcpStream::connect(destination))
        .await
        .map_err(|_| BridgeError::Network(format!("dial timeout reaching {destination}")))?
        .map_err(|e| BridgeError::Network(format!("dialing {destination}: {e}")))?;
    tcp.set_nodelay(true).ok();

    let stream = IdleTimeoutIo::new(tcp, timeouts.idle);

    let config = Arc::new(client::Config::default());
    let handler = ClientHandler {
        host_key_auth,
        events_tx: client_events_tx,
    };

    let mut handle = client::connect_stream(config, stream, handler)
        .await
        .map_err(|e| {
            BridgeError::Network(format!("ssh handshake with {destination} failed: {e}"))
        })?;

    let mut authenticated = false;
    for signer in signers {
        match handle.authenticate_publickey(system_login, signer).await {
            Ok(result) if result.success() => {
                authenticated = true;
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "signer rejected during downstream authentication");
                continue;
            }
        }
    }

    if !authenticated {
        let _ = handle.disconnect(russh::Disconnect::ByApplication, "", "").await;
        return Err(BridgeError::Unauthorized(format!(
            "no forwarded signer was accepted by {destination}"
        )));
    }

    info!(login = %system_login, "downstream handshake complete");

    let session = handle.channel_open_session().await?;

    Ok(DownstreamConnection {
        client: handle,
        session,
    })
}

/// Drains a just-opened channel's initial control messages, used by
/// subsystem/exec startup to confirm the remote side didn't immediately
/// fail the request. Returns once a `Success`/`Failure`/`Close` arrives.
pub async fn wait_for_channel_outcome(channel: &mut Channel<client::Msg>) -> bool {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return true,
            Some(ChannelMsg::Failure) | Some(ChannelMsg::Close) | None => return false,
            _ => continue,
        }
    }
}

#[allow(dead_code)]
fn default_dial_timeout() -> Duration {
    Timeouts::default().dial
}
