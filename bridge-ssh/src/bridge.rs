use std::collections::HashMap;
use std::sync::Arc;

use bridge_common::Identity;
use russh::server::Auth;
use russh::ChannelId;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::channels;
use crate::client::ClientHandlerEvent;
use crate::common::ServerChannelId;
use crate::config::BridgeConfig;
use crate::context::ServerContext;
use crate::dial;
use crate::downstream::Downstream;
use crate::error::BridgeError;
use crate::pipe::{DualPipe, PipeEnd};
use crate::server::{self, ServerHandlerEvent};
use crate::term_handlers::{DefaultTermHandlers, TermHandlers};

/// The running instance (§3 Bridge). Construction never dials; [`Bridge::serve`]
/// performs the upstream handshake, then the downstream dial, then enters
/// the dispatch loop, consuming `self` so it can run at most once.
pub struct Bridge {
    config: BridgeConfig,
    server_pipe: Option<PipeEnd>,
    client_pipe: Option<PipeEnd>,
    term_handlers: Arc<dyn TermHandlers>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let (server_pipe, client_pipe) = DualPipe::new(config.source.clone(), config.destination.clone());
        Ok(Self {
            config,
            server_pipe: Some(server_pipe),
            client_pipe: Some(client_pipe),
            term_handlers: Arc::new(DefaultTermHandlers),
        })
    }

    pub fn with_term_handlers(mut self, term_handlers: Arc<dyn TermHandlers>) -> Self {
        self.term_handlers = term_handlers;
        self
    }

    /// Hands the client-side pipe end to the caller, to be driven exactly
    /// as if it were a TCP socket already connected to an SSH server.
    pub fn dial(&mut self) -> PipeEnd {
        self.client_pipe
            .take()
            .expect("Bridge::dial called more than once")
    }

    /// The client-side pipe's remote address, which equals `Destination` (§3 invariant 5).
    pub fn advertise_addr(&self) -> &str {
        &self.config.destination
    }

    /// The fixed cluster identity this bridge reports to collaborators (§6).
    pub fn identity(&self) -> Identity {
        Identity
    }

    #[instrument(skip(self), fields(source = %self.config.source, destination = %self.config.destination))]
    pub async fn serve(mut self) -> Result<(), BridgeError> {
        let server_pipe = self
            .server_pipe
            .take()
            .expect("Bridge::serve called more than once");

        let mut event_rx = server::handshake(server_pipe, self.config.host_certificate.key.clone()).await?;

        let (server_handle, login) = authenticate(&mut event_rx, &self.config).await?;

        let downstream = match dial_downstream(&self.config, &login).await {
            Ok(downstream) => downstream,
            Err(e) => {
                warn!(error = %e, "downstream dial failed, rejecting channel opens and tearing down");
                drain_rejecting(&mut event_rx).await;
                return Err(e);
            }
        };

        info!(login = %login, "bridge serving");
        dispatch_loop(self.config, server_handle, downstream, login, event_rx, self.term_handlers).await;
        Ok(())
    }
}

async fn authenticate(
    event_rx: &mut mpsc::UnboundedReceiver<ServerHandlerEvent>,
    config: &BridgeConfig,
) -> Result<(russh::server::Handle, String), BridgeError> {
    let mut resolved_login: Option<String> = None;
    loop {
        match event_rx.recv().await {
            Some(ServerHandlerEvent::AuthPublicKey(user, key, reply)) => {
                match config.auth_client.resolve_login(&user, &key).await {
                    Ok(login) => {
                        resolved_login = Some(login);
                        let _ = reply.send(Auth::Accept);
                    }
                    Err(e) => {
                        warn!(user = %user, error = %e, "upstream public-key auth rejected");
                        let _ = reply.send(Auth::Reject {
                            proceed_with_methods: None,
                            partial_success: false,
                        });
                    }
                }
            }
            Some(ServerHandlerEvent::Authenticated(handle)) => {
                let login = resolved_login
                    .ok_or_else(|| BridgeError::Unauthorized("no login resolved before auth succeeded".into()))?;
                return Ok((handle.0, login));
            }
            Some(ServerHandlerEvent::Disconnect) | None => {
                return Err(BridgeError::Unauthorized(
                    "upstream disconnected before authenticating".into(),
                ));
            }
            Some(_) => continue,
        }
    }
}

async fn dial_downstream(config: &BridgeConfig, login: &str) -> Result<Arc<Downstream>, BridgeError> {
    let (client_events_tx, mut client_events_rx) = mpsc::unbounded_channel();
    let conn = dial::dial(
        &config.destination,
        login,
        &config.user_agent,
        config.host_key_auth.clone(),
        config.timeouts,
        client_events_tx,
    )
    .await?;

    let user_agent = config.user_agent.clone();
    tokio::spawn(async move {
        while let Some(ClientHandlerEvent::AgentChannelRequested(channel)) = client_events_rx.recv().await {
            let user_agent = user_agent.clone();
            tokio::spawn(async move { user_agent.serve(channel).await });
        }
    });

    Ok(Arc::new(Downstream::new(conn)))
}

/// §4.D: once the downstream dial has failed, every subsequent channel
/// open is rejected so the client sees a clean `ConnectionFailed` rather
/// than a silently hanging connection.
async fn drain_rejecting(event_rx: &mut mpsc::UnboundedReceiver<ServerHandlerEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ServerHandlerEvent::ChannelOpenSession(_, reply) => {
                let _ = reply.send(false);
            }
            ServerHandlerEvent::ChannelOpenDirectTcpIp(_, _, reply) => {
                let _ = reply.send(false);
            }
            ServerHandlerEvent::Disconnect => break,
            _ => {}
        }
    }
}

async fn dispatch_loop(
    config: BridgeConfig,
    server_handle: russh::server::Handle,
    downstream: Arc<Downstream>,
    login: String,
    mut event_rx: mpsc::UnboundedReceiver<ServerHandlerEvent>,
    term_handlers: Arc<dyn TermHandlers>,
) {
    let mut channel_senders: HashMap<ChannelId, mpsc::UnboundedSender<ServerHandlerEvent>> = HashMap::new();

    loop {
        let event = match event_rx.recv().await {
            Some(event) => event,
            None => break,
        };

        match event {
            ServerHandlerEvent::Disconnect => break,

            ServerHandlerEvent::TcpIpForward(address, port, reply) => {
                let allowed = downstream
                    .forward_global_request("tcpip-forward", &address, port)
                    .await
                    .unwrap_or(false);
                let _ = reply.send(allowed);
            }
            ServerHandlerEvent::CancelTcpIpForward(address, port, reply) => {
                let allowed = downstream
                    .forward_global_request("cancel-tcpip-forward", &address, port)
                    .await
                    .unwrap_or(false);
                let _ = reply.send(allowed);
            }

            ServerHandlerEvent::ChannelOpenSession(channel_id, reply) => {
                let (tx, rx) = mpsc::unbounded_channel();
                channel_senders.insert(channel_id.0, tx);
                let mut ctx = new_context(&config, &server_handle, &downstream, channel_id, &login);
                register_closers(&mut ctx, &server_handle, &downstream);
                let handlers = term_handlers.clone();
                tokio::spawn(async move {
                    channels::session::run(ctx, rx, handlers.as_ref()).await;
                });
                let _ = reply.send(true);
            }

            ServerHandlerEvent::ChannelOpenDirectTcpIp(channel_id, params, reply) => {
                let (tx, rx) = mpsc::unbounded_channel();
                channel_senders.insert(channel_id.0, tx);
                let mut ctx = new_context(&config, &server_handle, &downstream, channel_id, &login);
                register_closers(&mut ctx, &server_handle, &downstream);
                let target = params.target();
                let originator = params.originator();
                let local_addr = config.source.clone();
                tokio::spawn(async move {
                    channels::direct_tcpip::run(ctx, rx, target, local_addr, originator).await;
                });
                let _ = reply.send(true);
            }

            other => {
                if let Some(channel_id) = channel_id_of(&other) {
                    if let Some(sender) = channel_senders.get(&channel_id) {
                        if sender.send(other).is_err() {
                            warn!(channel = %channel_id, "channel handler gone, dropping event");
                        }
                    } else {
                        warn!(channel = %channel_id, "event for unknown channel, dropping");
                    }
                }
            }
        }
    }
}

fn new_context(
    config: &BridgeConfig,
    server_handle: &russh::server::Handle,
    downstream: &Arc<Downstream>,
    channel_id: ServerChannelId,
    login: &str,
) -> ServerContext {
    ServerContext::new(
        server_handle.clone(),
        channel_id,
        downstream.clone(),
        config.user_agent.clone(),
        config.auth_client.clone(),
        config.session_registry.clone(),
        login.to_string(),
    )
}

/// Registers the closers shared by every channel context: this channel,
/// the upstream connection, and the downstream client (§4.D per-channel
/// context teardown, §9 closer-set duplication — any channel ending
/// tears down the whole bridge).
fn register_closers(ctx: &mut ServerContext, server_handle: &russh::server::Handle, downstream: &Arc<Downstream>) {
    let channel_id = ctx.channel_id;
    let handle = server_handle.clone();
    ctx.closers.register(move || async move {
        let _ = handle.close(channel_id.0).await;
    });
    let handle = server_handle.clone();
    ctx.closers.register(move || async move {
        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, String::new(), String::new())
            .await;
    });
    let downstream = downstream.clone();
    ctx.closers.register(move || async move {
        downstream.disconnect().await;
    });
}

fn channel_id_of(event: &ServerHandlerEvent) -> Option<ChannelId> {
    use ServerHandlerEvent::*;
    match event {
        SubsystemRequest(id, ..)
        | ExecRequest(id, ..)
        | PtyRequest(id, ..)
        | ShellRequest(id, ..)
        | WindowChangeRequest(id, ..)
        | EnvRequest(id, ..)
        | AgentForwardRequest(id, ..)
        | Data(id, ..)
        | ExtendedData(id, ..)
        | ChannelClose(id, ..)
        | ChannelEof(id, ..) => Some(id.0),
        _ => None,
    }
}
