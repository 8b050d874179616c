use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{info, warn};

use bridge_common::AuditEvent;

use crate::context::ServerContext;
use crate::server::handler::ServerHandlerEvent;

const READ_BUF_SIZE: usize = 16 * 1024;

/// Bridges one accepted `direct-tcpip` channel to a freshly dialed TCP
/// socket at the parsed target (§4.D direct-tcpip). Two concurrent
/// copies run until either side signals EOF/close, at which point the
/// other is torn down too (testable properties 7 and 8).
pub async fn run(
    ctx: ServerContext,
    mut requests: UnboundedReceiver<ServerHandlerEvent>,
    target: String,
    local_addr: String,
    remote_addr: String,
) {
    let socket = match TcpStream::connect(&target).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(target = %target, error = %e, "direct-tcpip dial failed");
            ctx.teardown().await;
            return;
        }
    };
    socket.set_nodelay(true).ok();

    ctx.auth_client
        .emit_audit_event(AuditEvent::port_forward(
            target.clone(),
            ctx.login.clone(),
            local_addr,
            remote_addr,
        ))
        .await;
    info!(target = %target, login = %ctx.login, "direct-tcpip bridging started");

    let (mut read_half, write_half) = socket.into_split();
    let write_half = Arc::new(Mutex::new(write_half));

    let writer = {
        let write_half = write_half.clone();
        tokio::spawn(async move {
            while let Some(event) = requests.recv().await {
                match event {
                    ServerHandlerEvent::Data(_, data, reply) => {
                        let _ = write_half.lock().await.write_all(&data).await;
                        let _ = reply.send(());
                    }
                    ServerHandlerEvent::ExtendedData(_, data, _ext, reply) => {
                        let _ = write_half.lock().await.write_all(&data).await;
                        let _ = reply.send(());
                    }
                    ServerHandlerEvent::ChannelEof(_, reply) => {
                        let _ = write_half.lock().await.shutdown().await;
                        let _ = reply.send(());
                    }
                    ServerHandlerEvent::ChannelClose(_, reply) => {
                        let _ = reply.send(());
                        break;
                    }
                    _ => {}
                }
            }
        })
    };

    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                let _ = ctx.server_handle.eof(ctx.channel_id.0).await;
                break;
            }
            Ok(n) => {
                if ctx
                    .server_handle
                    .data(ctx.channel_id.0, bytes::Bytes::from(buf[..n].to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                warn!(target = %target, error = %e, "direct-tcpip socket read failed");
                break;
            }
        }
    }

    let _ = ctx.server_handle.close(ctx.channel_id.0).await;
    writer.abort();
    ctx.teardown().await;
}
