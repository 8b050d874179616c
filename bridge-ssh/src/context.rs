use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bridge_common::{AuthClient, SessionRegistry, UserAgent};
use bytes::Bytes;
use russh::server::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use crate::common::{PtyRequest, ServerChannelId};
use crate::downstream::Downstream;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type AsyncCloser = Box<dyn FnOnce() -> BoxFuture + Send + Sync>;

/// Closers registered against a [`ServerContext`], fired exactly once
/// (by-value consumption of the set) on channel teardown. Per the design
/// note on closer-set duplication, both channel handlers register the
/// same bridge-wide closers intentionally — any channel ending tears
/// down the whole bridge.
#[derive(Default)]
pub struct Closers(Vec<AsyncCloser>);

impl Closers {
    pub fn register<F, Fut>(&mut self, f: F)
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.0.push(Box::new(move || Box::pin(f())));
    }

    pub async fn close_all(self) {
        for closer in self.0 {
            closer().await;
        }
    }
}

/// Result of a completed remote `exec`, delivered on `ExecResultCh`.
#[derive(Clone, Copy, Debug)]
pub struct ExecResult {
    pub code: u32,
}

/// Result of a finished remote subsystem, delivered on `SubsystemResultCh`.
#[derive(Clone, Debug)]
pub struct SubsystemResult {
    pub name: String,
    pub error: Option<String>,
}

/// A write destined for the downstream session channel once it has been
/// claimed by an interactive exec/shell/subsystem. Routed through the
/// owning task's queue instead of the shared mutex so the reader and
/// writer never contend for the same lock (§4.D session; the teacher's
/// `SessionChannel::run` keeps exactly this shape, one task selecting
/// between its ops queue and the channel's own `wait()`).
#[derive(Debug)]
pub enum ChannelOp {
    Data(Bytes),
    ExtendedData(Bytes, u32),
    Eof,
    WindowChange(PtyRequest),
    Env(String, String),
}

/// Per-channel scoped resource created at channel accept and torn down
/// when the channel's handler returns (§3).
pub struct ServerContext {
    pub server_handle: Handle,
    pub channel_id: ServerChannelId,
    pub downstream: Arc<Downstream>,
    pub agent: Arc<dyn UserAgent>,
    pub auth_client: Arc<dyn AuthClient>,
    pub session_registry: Arc<dyn SessionRegistry>,
    pub login: String,
    pub closers: Closers,
    pub exec_result_tx: mpsc::UnboundedSender<ExecResult>,
    pub exec_result_rx: mpsc::UnboundedReceiver<ExecResult>,
    pub subsystem_result_tx: mpsc::UnboundedSender<SubsystemResult>,
    pub subsystem_result_rx: mpsc::UnboundedReceiver<SubsystemResult>,
    /// Set once an exec/shell/subsystem request claims the downstream
    /// channel for its remaining lifetime; `None` before that, in which
    /// case writers still lock `downstream.session` directly.
    pub active_ops_tx: Option<mpsc::UnboundedSender<ChannelOp>>,
}

impl ServerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_handle: Handle,
        channel_id: ServerChannelId,
        downstream: Arc<Downstream>,
        agent: Arc<dyn UserAgent>,
        auth_client: Arc<dyn AuthClient>,
        session_registry: Arc<dyn SessionRegistry>,
        login: String,
    ) -> Self {
        let (exec_result_tx, exec_result_rx) = mpsc::unbounded_channel();
        let (subsystem_result_tx, subsystem_result_rx) = mpsc::unbounded_channel();
        Self {
            server_handle,
            channel_id,
            downstream,
            agent,
            auth_client,
            session_registry,
            login,
            closers: Closers::default(),
            exec_result_tx,
            exec_result_rx,
            subsystem_result_tx,
            subsystem_result_rx,
            active_ops_tx: None,
        }
    }

    pub async fn teardown(self) {
        debug!(channel = %self.channel_id, "tearing down channel context");
        self.closers.close_all().await;
    }

    pub async fn stderr(&self, message: &str) {
        let data = bytes::Bytes::from(message.as_bytes().to_vec());
        let _ = self
            .server_handle
            .extended_data(self.channel_id.0, 1, data)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn closers_fire_exactly_once_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicU32::new(0));
        let mut closers = Closers::default();

        for i in 0..3u32 {
            let order = order.clone();
            let counter = counter.clone();
            closers.register(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                order.lock().unwrap().push(i);
            });
        }

        closers.close_all().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
