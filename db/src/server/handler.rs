use super::task::ServerTask;
use crate::cli::ServerConfig;
use crate::client::ClientHandler;
use crate::engine::store::StoreHandler;
use std::cell::RefCell;
use std::io::Result as IoResult;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// The bound listener plus the lifecycle plumbing for a clean shutdown.
/// The keyspace and the client registry are created when the loop starts.
///
/// All connection tasks are spawned onto a `LocalSet`, so every handler
/// runs on the single loop thread and the keyspace needs no locking.
pub struct Server {
    listener: std::net::TcpListener,
    config: ServerConfig,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl Server {
    /// Binds the listener eagerly and puts it in nonblocking mode, so the
    /// bound address is known before any runtime is involved (tests bind
    /// port 0 and read the address back).
    pub fn new(config: &ServerConfig) -> IoResult<Self> {
        let listener = std::net::TcpListener::bind((config.common.host.as_str(), config.port))?;
        listener.set_nonblocking(true)?;
        Ok(Server {
            listener,
            config: config.clone(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        self.listener.local_addr()
    }

    /// Cancelling this token stops the accept loop and tears down every
    /// live connection.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Accepts connections until interrupted or cancelled, then waits for
    /// all connection tasks to finish.
    pub async fn start(self) -> IoResult<()> {
        let Server {
            listener,
            config,
            task_tracker,
            cancellation_token,
        } = self;
        let listener = TcpListener::from_std(listener)?;
        info!(address = %listener.local_addr()?, "server listening");

        // the keyspace and the client registry live on the loop thread
        // only; connection tasks share them by reference counting
        let store_handler = Rc::new(RefCell::new(StoreHandler::new()));
        let client_handler = Rc::new(ClientHandler::new(config.common.maximum_clients));

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                loop {
                    tokio::select! {
                        biased;

                        _ = tokio::signal::ctrl_c() => {
                            info!("received interrupt signal, shutting down");
                            break;
                        }
                        _ = cancellation_token.cancelled() => {
                            info!("received cancellation, shutting down");
                            break;
                        }
                        accepted = listener.accept() => match accepted {
                            Ok((stream, addr)) => {
                                let Some(connected_client) = client_handler.connect(addr) else {
                                    warn!(client = %addr, "refusing connection over client limit");
                                    continue;
                                };
                                info!(client = %addr, "client connected");
                                let task = ServerTask::new(
                                    stream,
                                    connected_client,
                                    store_handler.clone(),
                                    client_handler.clone(),
                                );
                                task_tracker.spawn_local(task.process(cancellation_token.clone()));
                            }
                            Err(err) => error!(%err, "accept failed"),
                        },
                    }
                }
                cancellation_token.cancel();
                task_tracker.close();
                task_tracker.wait().await;
            })
            .await;
        info!("shutdown complete");
        Ok(())
    }
}
