//! Server setup and lifecycle.
//!
//! Provides:
//! - TCP and Unix socket listeners
//! - A cooperative accept loop polling the stop signal every 200ms
//! - One task per connection, each finishing its in-flight call on shutdown
//! - `run_server`, which opens the configured databases and serves them

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tamdb_proto::{decode, encode, framed, BindAddress, Request, Response, Transport};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::observability::metrics::record_accept_error;
use crate::service::{dispatch, DatabaseRegistry, ServiceError, ServiceState};
use crate::storage::{Store, StoreError};

/// Deadline of one accept call; also the stop-signal poll interval.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_millis(200);

/// A bound listening socket.
enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Listener {
    async fn bind(address: &BindAddress) -> io::Result<(Self, BindAddress)> {
        match address {
            BindAddress::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                let local = listener.local_addr()?;
                Ok((Self::Tcp(listener), BindAddress::Tcp(local.to_string())))
            }
            #[cfg(unix)]
            BindAddress::Unix(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => tracing::debug!(path = %path.display(), "Removed stale socket"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                let listener = UnixListener::bind(path)?;
                Ok((Self::Unix(listener, path.clone()), address.clone()))
            }
            #[cfg(not(unix))]
            BindAddress::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    async fn accept(&self) -> io::Result<(Box<dyn Transport>, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string()))
            }
        }
    }

    /// Drop the socket, removing a Unix socket file.
    fn close(self) {
        match self {
            Self::Tcp(listener) => drop(listener),
            #[cfg(unix)]
            Self::Unix(listener, path) => {
                drop(listener);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket");
                    }
                }
            }
        }
    }
}

/// The TamDB network service.
///
/// Databases are registered first, then [`TamServer::listen`] spawns the
/// accept loop. The server stops when the watch channel it was created
/// with turns `true` or [`TamServer::close`] is called.
pub struct TamServer {
    state: Arc<ServiceState>,
    listening: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
    shutdown_rx: watch::Receiver<bool>,
}

impl TamServer {
    pub fn new(query_window_secs: i64, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            state: Arc::new(ServiceState::new(DatabaseRegistry::new(), query_window_secs)),
            listening: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shutdown_rx,
        }
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.state.registry
    }

    /// Register a store under `name`. Only allowed before listening.
    pub fn register(&self, name: impl Into<String>, store: Arc<Store>) -> Result<(), ServiceError> {
        if self.listening.load(Ordering::Acquire) {
            return Err(ServiceError::AlreadyListening);
        }
        self.state.registry.insert(name.into(), store)
    }

    /// Bind `address` and spawn the accept loop.
    ///
    /// Returns the bound address, which differs from `address` when an
    /// ephemeral TCP port was requested.
    pub async fn listen(&self, address: &BindAddress) -> Result<BindAddress, ServiceError> {
        if self.listening.swap(true, Ordering::AcqRel) {
            return Err(ServiceError::AlreadyListening);
        }

        let (listener, bound) = match Listener::bind(address).await {
            Ok(bound) => bound,
            Err(source) => {
                self.listening.store(false, Ordering::Release);
                return Err(ServiceError::Bind {
                    address: address.to_string(),
                    source,
                });
            }
        };

        // Fold the external stop signal into the cancellation token.
        let shutdown_rx = self.shutdown_rx.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = stop_requested(shutdown_rx) => cancel.cancel(),
                () = cancel.cancelled() => {}
            }
        });

        self.tracker.spawn(accept_loop(
            listener,
            Arc::clone(&self.state),
            self.tracker.clone(),
            self.cancel.clone(),
        ));

        tracing::info!(address = %bound, databases = ?self.registry().names(), "Listening");
        Ok(bound)
    }

    /// Stop accepting connections. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the accept loop and every connection task to finish.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Stop, wait for tasks, then close every store.
    pub async fn shutdown(&self) {
        self.close();
        self.wait().await;
        self.state.registry.close_all();
    }
}

/// Resolves once the watch channel turns `true` or its sender is dropped.
async fn stop_requested(mut shutdown_rx: watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

async fn accept_loop(
    listener: Listener,
    state: Arc<ServiceState>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match timeout(ACCEPT_TIMEOUT, listener.accept()).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                record_accept_error();
                tracing::warn!(error = %e, "Accept failed");
            }
            Ok(Ok((stream, peer))) => {
                tracing::debug!(peer = %peer, "Accepted connection");
                tracker.spawn(serve_connection(
                    stream,
                    peer,
                    Arc::clone(&state),
                    cancel.clone(),
                ));
            }
        }
    }

    listener.close();
    tracing::info!("Stopped accepting connections");
}

/// Serve calls on one connection until the peer leaves or the server stops.
///
/// The stop signal is only observed between calls, so a request already
/// read is always answered.
async fn serve_connection(
    stream: Box<dyn Transport>,
    peer: String,
    state: Arc<ServiceState>,
    cancel: CancellationToken,
) {
    let mut messages = framed(stream);

    loop {
        let frame = tokio::select! {
            biased;
            frame = messages.next() => frame,
            () = cancel.cancelled() => break,
        };

        let frame = match frame {
            None => break,
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!(peer = %peer, error = %e, "Connection read failed");
                break;
            }
        };

        let response = match decode::<Request>(&frame) {
            Ok(request) => {
                tracing::debug!(peer = %peer, id = request.id, method = request.call.method(), "Call");
                Response {
                    id: request.id,
                    reply: dispatch(&state, request.call).await,
                }
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Undecodable request");
                Response::error(0, e.to_string())
            }
        };

        let payload = match encode(&response) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "Failed to encode response");
                break;
            }
        };
        if let Err(e) = messages.send(payload).await {
            tracing::warn!(peer = %peer, error = %e, "Connection write failed");
            break;
        }
    }

    tracing::debug!(peer = %peer, "Connection closed");
}

/// Run the TamDB server.
///
/// Opens every configured database, skipping those whose storage is
/// unavailable, serves them until `shutdown_rx` turns `true`, then closes
/// them.
pub async fn run_server(
    config: Config,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let server = TamServer::new(config.query_window_secs, shutdown_rx.clone());

    for (name, options) in config.store_options() {
        let opened = tokio::task::spawn_blocking(move || Store::open(options)).await?;
        match opened {
            Ok(store) => server.register(name, Arc::new(store))?,
            Err(StoreError::StorageUnavailable { path, source }) => {
                tracing::error!(
                    database = %name,
                    path = %path.display(),
                    error = %source,
                    "Storage unavailable, database not served"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    if server.registry().is_empty() {
        tracing::warn!("No databases registered, every query will be rejected");
    }

    let bound = server.listen(&config.bind).await?;
    tracing::info!(address = %bound, "TamDB server started");

    stop_requested(shutdown_rx).await;
    tracing::info!("Shutdown signal received, stopping server");

    server.shutdown().await;

    tracing::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Backend, StoreOptions};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_register_after_listen_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(false);
        let server = TamServer::new(3600, rx);

        server
            .listen(&BindAddress::Tcp("127.0.0.1:0".into()))
            .await
            .unwrap();
        let store = Store::open(StoreOptions::new(Backend::Sqlite, "m", "t", temp_dir.path())).unwrap();
        let result = server.register("m", Arc::new(store));
        assert!(matches!(result, Err(ServiceError::AlreadyListening)));

        let again = server.listen(&BindAddress::Tcp("127.0.0.1:0".into())).await;
        assert!(matches!(again, Err(ServiceError::AlreadyListening)));

        server.close();
        server.close();
        tokio::time::timeout(Duration::from_secs(2), server.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_listen_reports_ephemeral_port() {
        let (_tx, rx) = watch::channel(false);
        let server = TamServer::new(3600, rx);

        let bound = server
            .listen(&BindAddress::Tcp("127.0.0.1:0".into()))
            .await
            .unwrap();
        match bound {
            BindAddress::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected address {other}"),
        }
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_watch_signal_stops_accept_loop() {
        let (tx, rx) = watch::channel(false);
        let server = TamServer::new(3600, rx);
        server
            .listen(&BindAddress::Tcp("127.0.0.1:0".into()))
            .await
            .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(ACCEPT_TIMEOUT * 5, server.wait())
            .await
            .unwrap();
        assert!(server.is_closed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_failure_allows_retry() {
        let (_tx, rx) = watch::channel(false);
        let server = TamServer::new(3600, rx);

        let result = server
            .listen(&BindAddress::Unix(PathBuf::from("/nonexistent-dir/tamdb.socket")))
            .await;
        assert!(matches!(result, Err(ServiceError::Bind { .. })));

        server
            .listen(&BindAddress::Tcp("127.0.0.1:0".into()))
            .await
            .unwrap();
        server.shutdown().await;
    }
}
