use std::fmt::Debug;

use bytes::Bytes;
use russh::keys::PublicKey;
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::common::{DirectTcpIpParams, PtyRequest, ServerChannelId};
use crate::error::BridgeError;

pub struct HandleWrapper(pub Handle);

impl Debug for HandleWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HandleWrapper")
    }
}

/// Every upstream `russh::server::Handler` callback translated into an
/// event carrying a oneshot reply channel, so the Handler itself stays a
/// thin, synchronous-looking adapter while the bridge's dispatch loop
/// (running on its own task) decides the actual response.
#[derive(Debug)]
pub enum ServerHandlerEvent {
    Authenticated(HandleWrapper),
    AuthPublicKey(String, PublicKey, oneshot::Sender<Auth>),
    ChannelOpenSession(ServerChannelId, oneshot::Sender<bool>),
    ChannelOpenDirectTcpIp(ServerChannelId, DirectTcpIpParams, oneshot::Sender<bool>),
    SubsystemRequest(ServerChannelId, String, oneshot::Sender<bool>),
    ExecRequest(ServerChannelId, Bytes, oneshot::Sender<bool>),
    PtyRequest(ServerChannelId, PtyRequest, oneshot::Sender<bool>),
    ShellRequest(ServerChannelId, oneshot::Sender<bool>),
    WindowChangeRequest(ServerChannelId, PtyRequest, oneshot::Sender<()>),
    EnvRequest(ServerChannelId, String, String, oneshot::Sender<()>),
    AgentForwardRequest(ServerChannelId, oneshot::Sender<bool>),
    Data(ServerChannelId, Bytes, oneshot::Sender<()>),
    ExtendedData(ServerChannelId, Bytes, u32, oneshot::Sender<()>),
    ChannelClose(ServerChannelId, oneshot::Sender<()>),
    ChannelEof(ServerChannelId, oneshot::Sender<()>),
    TcpIpForward(String, u32, oneshot::Sender<bool>),
    CancelTcpIpForward(String, u32, oneshot::Sender<bool>),
    Disconnect,
}

#[derive(thiserror::Error, Debug)]
pub enum ServerHandlerError {
    #[error("dispatch loop disconnected")]
    ChannelSend,
}

pub struct ServerHandler {
    pub event_tx: UnboundedSender<ServerHandlerEvent>,
}

impl ServerHandler {
    fn send_event(&self, event: ServerHandlerEvent) -> Result<(), ServerHandlerError> {
        self.event_tx
            .send(event)
            .map_err(|_| ServerHandlerError::ChannelSend)
    }
}

impl russh::server::Handler for ServerHandler {
    type Error = anyhow::Error;

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        self.send_event(ServerHandlerEvent::Authenticated(HandleWrapper(session.handle())))?;
        Ok(())
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::AuthPublicKey(user.to_string(), key.clone(), tx))?;
        Ok(rx.await.unwrap_or(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        }))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::ChannelOpenSession(
            ServerChannelId(channel.id()),
            tx,
        ))?;
        Ok(rx.await.unwrap_or(false))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::ChannelOpenDirectTcpIp(
            ServerChannelId(channel.id()),
            DirectTcpIpParams {
                host_to_connect: host_to_connect.to_string(),
                port_to_connect,
                originator_address: originator_address.to_string(),
                originator_port,
            },
            tx,
        ))?;
        Ok(rx.await.unwrap_or(false))
    }

    /// The bridge only ever accepts `session` and `direct-tcpip` channels
    /// (§4.D); every other registered type is rejected outright rather
    /// than falling through to `russh`'s silent default, so testable
    /// property 4 ("unknown channel type: NAME") has a real code path.
    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(reject_unknown_channel_type("x11"))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(reject_unknown_channel_type("forwarded-tcpip"))
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::SubsystemRequest(
            ServerChannelId(channel),
            name.to_string(),
            tx,
        ))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::ExecRequest(
            ServerChannelId(channel),
            Bytes::from(data.to_vec()),
            tx,
        ))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::PtyRequest(
            ServerChannelId(channel),
            PtyRequest {
                term: term.to_string(),
                col_width,
                row_height,
                pix_width,
                pix_height,
                modes: modes.to_vec(),
            },
            tx,
        ))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::ShellRequest(ServerChannelId(channel), tx))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::WindowChangeRequest(
            ServerChannelId(channel),
            PtyRequest {
                term: String::new(),
                col_width,
                row_height,
                pix_width,
                pix_height,
                modes: vec![],
            },
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::EnvRequest(
            ServerChannelId(channel),
            variable_name.to_string(),
            variable_value.to_string(),
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn agent_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::AgentForwardRequest(ServerChannelId(channel), tx))?;
        // auth-agent-req@openssh.com is always accepted, even on policy
        // denial, for OpenSSH interoperability; see §4.D agent forwarding.
        let _ = rx.await;
        session.channel_success(channel)?;
        Ok(false)
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::Data(
            ServerChannelId(channel),
            Bytes::from(data.to_vec()),
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn extended_data(
        &mut self,
        channel: ChannelId,
        code: u32,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::ExtendedData(
            ServerChannelId(channel),
            Bytes::from(data.to_vec()),
            code,
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::ChannelClose(ServerChannelId(channel), tx))?;
        let _ = rx.await;
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::ChannelEof(ServerChannelId(channel), tx))?;
        let _ = rx.await;
        Ok(())
    }

    async fn tcpip_forward(&mut self, address: &str, port: &mut u32, session: &mut Session) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::TcpIpForward(address.to_string(), *port, tx))?;
        let allowed = rx.await.unwrap_or(false);
        if allowed {
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(allowed)
    }

    async fn cancel_tcpip_forward(&mut self, address: &str, port: u32, session: &mut Session) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send_event(ServerHandlerEvent::CancelTcpIpForward(address.to_string(), port, tx))?;
        let allowed = rx.await.unwrap_or(false);
        if allowed {
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(allowed)
    }
}

fn reject_unknown_channel_type(channel_type: &str) -> bool {
    let err = BridgeError::UnknownChannelType(channel_type.to_string());
    warn!(error = %err, "rejecting channel open");
    false
}

impl Drop for ServerHandler {
    fn drop(&mut self) {
        debug!("server handler dropped");
        let _ = self.event_tx.send(ServerHandlerEvent::Disconnect);
    }
}

impl Debug for ServerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServerHandler")
    }
}
