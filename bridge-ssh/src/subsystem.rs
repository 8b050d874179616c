use russh::ChannelMsg;
use tokio::sync::mpsc;
use tracing::warn;

use crate::context::{ChannelOp, ServerContext, SubsystemResult};
use crate::dial::wait_for_channel_outcome;
use crate::error::BridgeError;

/// Starts a subsystem on the downstream's shared session channel and, on
/// acceptance, spawns a background task that bridges bytes back to the
/// upstream channel and posts the outcome to `subsystem_result_tx` when
/// the remote side closes it (§4.F).
pub async fn start(ctx: &mut ServerContext, name: &str) -> Result<(), BridgeError> {
    let session = ctx.downstream.session.clone();
    let mut channel = session.lock_owned().await;
    channel.request_subsystem(true, name).await?;

    if !wait_for_channel_outcome(&mut channel).await {
        return Err(BridgeError::other(std::io::Error::other(format!(
            "downstream rejected subsystem {name}"
        ))));
    }

    let (ops_tx, mut ops_rx) = mpsc::unbounded_channel();
    ctx.active_ops_tx = Some(ops_tx);

    let server_handle = ctx.server_handle.clone();
    let channel_id = ctx.channel_id;
    let subsystem_result_tx = ctx.subsystem_result_tx.clone();
    let name = name.to_string();

    // One task owns the channel for the rest of its life, selecting
    // between writes queued by the dispatch loop and reads from the
    // remote, the same shape `spawn_channel_owner` uses for exec/shell —
    // so a write in flight never has to wait on a reader holding the lock.
    tokio::spawn(async move {
        let mut channel = channel;
        let error = loop {
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
                        Some(ChannelOp::WindowChange(_)) => {}
                        Some(ChannelOp::Env(name, value)) => {
                            let _ = channel.set_env(false, &name, &value).await;
                        }
                        None => break None,
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
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break None,
                        _ => {}
                    }
                }
            }
        };
        if subsystem_result_tx
            .send(SubsystemResult { name: name.clone(), error })
            .is_err()
        {
            warn!(subsystem = %name, "subsystem result dropped, no receiver listening");
        }
    });

    Ok(())
}
