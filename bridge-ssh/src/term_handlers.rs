use async_trait::async_trait;
use russh::client;
use russh::server::Handle as ServerHandle;
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::common::{PtyRequest, ServerChannelId};
use crate::context::{ChannelOp, ExecResult, ServerContext};
use crate::dial::wait_for_channel_outcome;
use crate::error::BridgeError;

/// Reusable handlers for the interactive session request types. The
/// originals these stand in for are shared with native (non-forwarding)
/// SSH servers and are treated as an out-of-scope collaborator; this is
/// a concrete default implementation so the bridge is runnable and
/// testable on its own, swappable via the trait for an embedding proxy
/// that already has a richer version.
#[async_trait]
pub trait TermHandlers: Send + Sync {
    async fn handle_exec(&self, ctx: &mut ServerContext, command: String) -> Result<(), BridgeError>;
    async fn handle_pty_req(&self, ctx: &mut ServerContext, req: PtyRequest) -> Result<(), BridgeError>;
    async fn handle_shell(&self, ctx: &mut ServerContext) -> Result<(), BridgeError>;
    async fn handle_win_change(&self, ctx: &mut ServerContext, req: PtyRequest) -> Result<(), BridgeError>;
}

/// Owns the downstream channel for the rest of its life once an exec or
/// shell request is accepted: one task selects between write operations
/// arriving from the dispatch loop's `ops_rx` and data/exit arriving from
/// the remote, so a live stdin byte and a live stdout byte never contend
/// for the same lock. Mirrors the teacher's `SessionChannel::run`, which
/// keeps a single task `select!`ing between outgoing ops and
/// `client_channel.wait()` over one owned channel instead of splitting
/// reader and writer across tasks. Shell completions report code `0`;
/// there is no exit code on a clean interactive logout, and the session
/// loop only cares that the channel is done.
fn spawn_channel_owner(
    mut channel: OwnedMutexGuard<Channel<client::Msg>>,
    server_handle: ServerHandle,
    channel_id: ServerChannelId,
    exec_result_tx: UnboundedSender<ExecResult>,
    mut ops_rx: UnboundedReceiver<ChannelOp>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                op = ops_rx.recv() => {
                    match op {
                        Some(ChannelOp::Data(data)) => {
                            let _ = channel.data(&data[..]).await;
                        }
                        Some(ChannelOp::ExtendedData(data, ext)) => {
                            let _ = channel.extended_data(ext, &data[..]).await;
                        }
                        Some(ChannelOp::Eof) => {
                            let _ = channel.eof().await;
                        }
                        Some(ChannelOp::WindowChange(req)) => {
                            if let Err(e) = channel
                                .window_change(req.col_width, req.row_height, req.pix_width, req.pix_height)
                                .await
                            {
                                warn!(error = %e, "window-change forwarding failed");
                            }
                        }
                        Some(ChannelOp::Env(name, value)) => {
                            if let Err(e) = channel.set_env(false, &name, &value).await {
                                debug!(name = %name, error = %e, "env forwarding failed, ignoring");
                            }
                        }
                        None => break,
                    }
                }
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => {
                            let _ = server_handle
                                .data(channel_id.0, bytes::Bytes::from(data.to_vec()))
                                .await;
                        }
                        Some(ChannelMsg::ExtendedData { data, ext }) => {
                            let _ = server_handle
                                .extended_data(channel_id.0, ext, bytes::Bytes::from(data.to_vec()))
                                .await;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            let _ = exec_result_tx.send(ExecResult { code: exit_status });
                            break;
                        }
                        Some(ChannelMsg::Close) | None => {
                            let _ = exec_result_tx.send(ExecResult { code: 0 });
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    });
}

pub struct DefaultTermHandlers;

#[async_trait]
impl TermHandlers for DefaultTermHandlers {
    async fn handle_exec(&self, ctx: &mut ServerContext, command: String) -> Result<(), BridgeError> {
        let session = ctx.downstream.session.clone();
        let mut channel = session.lock_owned().await;
        channel.exec(true, command).await?;

        if !wait_for_channel_outcome(&mut channel).await {
            return Err(BridgeError::other(std::io::Error::other(
                "downstream rejected exec request",
            )));
        }

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        ctx.active_ops_tx = Some(ops_tx);
        spawn_channel_owner(
            channel,
            ctx.server_handle.clone(),
            ctx.channel_id,
            ctx.exec_result_tx.clone(),
            ops_rx,
        );
        Ok(())
    }

    async fn handle_pty_req(&self, ctx: &mut ServerContext, req: PtyRequest) -> Result<(), BridgeError> {
        let channel = ctx.downstream.session.lock().await;
        channel
            .request_pty(true, &req.term, req.col_width, req.row_height, req.pix_width, req.pix_height, &req.modes)
            .await?;
        Ok(())
    }

    async fn handle_shell(&self, ctx: &mut ServerContext) -> Result<(), BridgeError> {
        let session = ctx.downstream.session.clone();
        let mut channel = session.lock_owned().await;
        channel.request_shell(true).await?;

        if !wait_for_channel_outcome(&mut channel).await {
            return Err(BridgeError::other(std::io::Error::other(
                "downstream rejected shell request",
            )));
        }

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        ctx.active_ops_tx = Some(ops_tx);
        spawn_channel_owner(
            channel,
            ctx.server_handle.clone(),
            ctx.channel_id,
            ctx.exec_result_tx.clone(),
            ops_rx,
        );
        Ok(())
    }

    /// Before an interactive channel is claimed, window-change requests
    /// are rare (a resize before any shell exists) and safe to send on a
    /// transient lock; once exec/shell owns the channel, route through
    /// its ops queue instead of re-locking the mutex it never releases.
    async fn handle_win_change(&self, ctx: &mut ServerContext, req: PtyRequest) -> Result<(), BridgeError> {
        if let Some(ops_tx) = &ctx.active_ops_tx {
            let _ = ops_tx.send(ChannelOp::WindowChange(req));
            return Ok(());
        }
        let channel = ctx.downstream.session.lock().await;
        match channel
            .window_change(req.col_width, req.row_height, req.pix_width, req.pix_height)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "window-change forwarding failed");
                Ok(())
            }
        }
    }
}
