pub mod handler;

use std::fmt::Debug;
use std::sync::Arc;

use russh::keys::PrivateKey;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::unbounded_channel;
use tracing::warn;

use crate::error::BridgeError;

pub use handler::{ServerHandler, ServerHandlerEvent};

/// Runs the upstream SSH server handshake on an already-accepted stream
/// (here, one end of the in-memory [`DualPipe`](crate::pipe::DualPipe)),
/// spawns the connection's protocol-driving future in the background, and
/// returns the event stream the bridge's dispatch loop consumes.
pub async fn handshake<S>(
    stream: S,
    host_key: PrivateKey,
) -> Result<tokio::sync::mpsc::UnboundedReceiver<ServerHandlerEvent>, BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Debug + Send + 'static,
{
    let config = Arc::new(russh::server::Config {
        auth_rejection_time: std::time::Duration::from_secs(1),
        auth_rejection_time_initial: Some(std::time::Duration::from_secs(0)),
        methods: russh::MethodSet::from(&[russh::MethodKind::PublicKey][..]),
        keys: vec![host_key],
        ..<_>::default()
    });

    let (event_tx, event_rx) = unbounded_channel();
    let handler = ServerHandler { event_tx };
    let session = russh::server::run_stream(config, stream, handler)
        .await
        .map_err(|e| BridgeError::other(std::io::Error::other(e)))?;
    tokio::spawn(async move {
        if let Err(e) = session.await {
            warn!(error = %e, "upstream session ended with error");
        }
    });
    Ok(event_rx)
}
