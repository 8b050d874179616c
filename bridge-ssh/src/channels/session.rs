use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::context::{ChannelOp, ServerContext};
use crate::error::BridgeError;
use crate::server::handler::ServerHandlerEvent;
use crate::subsystem;
use crate::term_handlers::TermHandlers;

const REMOTE_COMMAND_FAILURE: u32 = 255;

/// Drives one `session` channel end to end (§4.D session): joins an
/// interactive-session record, then dispatches whichever of exec/pty-req/
/// shell/window-change/env/subsystem/agent-forward requests the client
/// sends, in arrival order, until the channel closes or a request fails
/// outright.
pub async fn run(
    mut ctx: ServerContext,
    mut requests: UnboundedReceiver<ServerHandlerEvent>,
    term_handlers: &dyn TermHandlers,
) {
    let channel_label = ctx.channel_id.to_string();
    let session_id = match ctx
        .session_registry
        .create_or_join_session(&ctx.login, channel_label.clone())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            ctx.stderr(&format!("failed to join session: {e}")).await;
            let _ = ctx
                .server_handle
                .exit_status_request(ctx.channel_id.0, REMOTE_COMMAND_FAILURE)
                .await;
            ctx.teardown().await;
            return;
        }
    };

    loop {
        tokio::select! {
            result = ctx.subsystem_result_rx.recv() => {
                if let Some(result) = result {
                    if let Some(err) = &result.error {
                        warn!(subsystem = %result.name, error = %err, "subsystem exited with error");
                    }
                }
                break;
            }
            result = ctx.exec_result_rx.recv() => {
                if let Some(result) = result {
                    let _ = ctx
                        .server_handle
                        .exit_status_request(ctx.channel_id.0, result.code)
                        .await;
                }
                break;
            }
            event = requests.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = dispatch(&mut ctx, &session_id, &channel_label, event, term_handlers).await {
                    ctx.stderr(&format!("{e}")).await;
                    break;
                }
            }
        }
    }

    ctx.teardown().await;
}

async fn dispatch(
    ctx: &mut ServerContext,
    session_id: &str,
    channel_label: &str,
    event: ServerHandlerEvent,
    term_handlers: &dyn TermHandlers,
) -> Result<(), BridgeError> {
    match event {
        ServerHandlerEvent::ExecRequest(_, data, reply) => {
            let command = String::from_utf8_lossy(&data).into_owned();
            match term_handlers.handle_exec(ctx, command).await {
                Ok(()) => {
                    let _ = reply.send(true);
                    Ok(())
                }
                Err(e) => {
                    let _ = reply.send(false);
                    Err(e)
                }
            }
        }
        ServerHandlerEvent::PtyRequest(_, req, reply) => match term_handlers.handle_pty_req(ctx, req).await {
            Ok(()) => {
                let _ = reply.send(true);
                Ok(())
            }
            Err(e) => {
                let _ = reply.send(false);
                Err(e)
            }
        },
        ServerHandlerEvent::ShellRequest(_, reply) => match term_handlers.handle_shell(ctx).await {
            Ok(()) => {
                let _ = reply.send(true);
                Ok(())
            }
            Err(e) => {
                let _ = reply.send(false);
                Err(e)
            }
        },
        ServerHandlerEvent::WindowChangeRequest(_, req, reply) => {
            let result = term_handlers.handle_win_change(ctx, req).await;
            let _ = reply.send(());
            result
        }
        ServerHandlerEvent::EnvRequest(_, name, value, reply) => {
            if let Some(ops_tx) = &ctx.active_ops_tx {
                let _ = ops_tx.send(ChannelOp::Env(name, value));
            } else if let Err(e) = ctx.downstream.set_env(&name, &value).await {
                debug!(name = %name, error = %e, "env forwarding failed, ignoring");
            }
            let _ = reply.send(());
            Ok(())
        }
        ServerHandlerEvent::SubsystemRequest(_, name, reply) => {
            if name == "x-teleport-request-resize-events" {
                ctx.session_registry
                    .register_resize_subscriber(session_id, channel_label.to_string())
                    .await;
                let _ = reply.send(true);
                return Ok(());
            }
            match subsystem::start(ctx, &name).await {
                Ok(()) => {
                    let _ = reply.send(true);
                    Ok(())
                }
                Err(e) => {
                    let _ = reply.send(false);
                    Err(e)
                }
            }
        }
        ServerHandlerEvent::AgentForwardRequest(_, reply) => {
            handle_agent_forward(ctx).await;
            let _ = reply.send(true);
            Ok(())
        }
        ServerHandlerEvent::Data(_, data, reply) => {
            if let Some(ops_tx) = &ctx.active_ops_tx {
                let _ = ops_tx.send(ChannelOp::Data(data));
            } else if let Err(e) = ctx.downstream.session.lock().await.data(&data[..]).await {
                debug!(error = %e, "failed to forward data downstream");
            }
            let _ = reply.send(());
            Ok(())
        }
        ServerHandlerEvent::ExtendedData(_, data, ext, reply) => {
            if let Some(ops_tx) = &ctx.active_ops_tx {
                let _ = ops_tx.send(ChannelOp::ExtendedData(data, ext));
            } else if let Err(e) = ctx.downstream.session.lock().await.extended_data(ext, &data[..]).await {
                debug!(error = %e, "failed to forward extended data downstream");
            }
            let _ = reply.send(());
            Ok(())
        }
        ServerHandlerEvent::ChannelEof(_, reply) => {
            if let Some(ops_tx) = &ctx.active_ops_tx {
                let _ = ops_tx.send(ChannelOp::Eof);
            } else {
                let _ = ctx.downstream.session.lock().await.eof().await;
            }
            let _ = reply.send(());
            Ok(())
        }
        ServerHandlerEvent::ChannelClose(_, reply) => {
            let _ = reply.send(());
            Err(BridgeError::other(std::io::Error::other("channel closed")))
        }
        other => {
            warn!(?other, "unsupported session request type");
            Err(BridgeError::BadParameter("unsupported session request type".into()))
        }
    }
}

/// §4.D agent forwarding: policy check, then begin serving the forwarded
/// agent over the downstream client, then advertise availability on the
/// session. Every failure is logged and dropped, never propagated, for
/// OpenSSH interoperability (§6, §9 agent-forward idempotence).
async fn handle_agent_forward(ctx: &ServerContext) {
    if let Err(e) = ctx.auth_client.check_agent_forward(&ctx.login).await {
        debug!(login = %ctx.login, error = %e, "agent forward denied by policy");
        return;
    }
    if let Err(e) = ctx.downstream.advertise_agent_forward().await {
        warn!(error = %e, "failed to advertise agent forward to downstream");
    }
}
