//! Node lifecycle: owns the cache, the engine, and the control service.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use ipfwd_fastpath::{ForwardingEngine, RewriteCache};

use crate::config::{parse_socket_addr, NodeConfig};
use crate::control::{self, ControlHandle};
use crate::error::NodeError;

/// The ipfwd daemon.
///
/// Construction wires the single shared [`RewriteCache`] instance to the
/// engine and the control plane; the cache lives for the process lifetime
/// and is torn down with the node. Packet delivery is an external
/// collaborator: it drives [`engine`](Self::engine) once per received
/// frame and acts on the verdict.
pub struct Node {
    config: NodeConfig,
    cache: Arc<RewriteCache>,
    engine: Arc<ForwardingEngine>,
    control: Option<ControlHandle>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Cloneable handle for requesting shutdown from signal handlers.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let cache = Arc::new(RewriteCache::new(config.node.cache_capacity));
        let resolver = Arc::new(config.build_resolver()?);
        let engine = Arc::new(ForwardingEngine::new(Arc::clone(&cache), resolver));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            cache,
            engine,
            control: None,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The shared forwarding engine, for the packet delivery collaborator.
    pub fn engine(&self) -> Arc<ForwardingEngine> {
        Arc::clone(&self.engine)
    }

    /// The shared rewrite cache.
    pub fn cache(&self) -> Arc<RewriteCache> {
        Arc::clone(&self.cache)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Bind the control service.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.control.is_some() {
            return Err(NodeError::AlreadyRunning);
        }
        let bind = parse_socket_addr(&self.config.control.bind)?;
        let handle = control::serve(Arc::clone(&self.cache), bind).await?;
        info!(
            control = %handle.local_addr(),
            cache_capacity = self.cache.capacity(),
            routes = self.config.routes.len(),
            "node started"
        );
        self.control = Some(handle);
        Ok(())
    }

    /// The control service's bound address, once started.
    pub fn control_addr(&self) -> Option<std::net::SocketAddr> {
        self.control.as_ref().map(|c| c.local_addr())
    }

    /// Block until shutdown is requested.
    pub async fn run(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop the control service and drop shared state.
    pub async fn shutdown(&mut self) {
        if let Some(control) = self.control.take() {
            control.stop().await;
        }
        info!("node stopped");
    }
}
