use russh::client::{self, Msg, Session};
use russh::keys::PublicKey;
use russh::Channel;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::config::HostKeyAuth;
use crate::error::BridgeError;

/// Events the downstream client connection raises that the bridge needs
/// to react to outside the handshake itself: the remote host opening a
/// channel back through a forwarded agent.
pub enum ClientHandlerEvent {
    AgentChannelRequested(Channel<Msg>),
}

/// Client-role `russh` handler for the downstream connection. Unlike the
/// upstream [`ServerHandler`](crate::server::handler::ServerHandler), this
/// handshake has no interactive auth to arbitrate — [`HostKeyAuth`] is the
/// only policy decision it makes — so it is driven directly rather than
/// through an event/oneshot indirection.
pub struct ClientHandler {
    pub host_key_auth: HostKeyAuth,
    pub events_tx: UnboundedSender<ClientHandlerEvent>,
}

impl client::Handler for ClientHandler {
    type Error = BridgeError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        (self.host_key_auth)(server_public_key)?;
        Ok(true)
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let id = channel.id();
        if self
            .events_tx
            .send(ClientHandlerEvent::AgentChannelRequested(channel))
            .is_err()
        {
            warn!(channel = %id, "agent channel requested but no forwarder is listening");
        }
        Ok(())
    }
}
