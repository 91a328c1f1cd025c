//! WebSocket push server.
//!
//! Every accepted client gets its own bounded outbound queue drained by a
//! writer task, so [`BroadcastServer::push_message`] never waits on the
//! network. A client whose queue fills up is dropped instead of holding up
//! the others. Messages pushed to a client arrive in push order.

use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const COMPONENT: &str = "BroadcastServer";

/// Pushes a client may lag behind before it is disconnected.
pub const CLIENT_QUEUE_CAPACITY: usize = 1024;

pub type ClientId = u64;

struct Client {
    peer: SocketAddr,
    tx: mpsc::Sender<String>,
}

/// Connected clients, keyed by connection id.
#[derive(Default)]
struct ClientSet {
    clients: Mutex<HashMap<ClientId, Client>>,
    next_id: AtomicU64,
}

impl ClientSet {
    fn register(&self, peer: SocketAddr, tx: mpsc::Sender<String>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().insert(id, Client { peer, tx });
        id
    }

    /// Removing an absent client is a no-op.
    fn unregister(&self, id: ClientId) -> bool {
        self.clients.lock().remove(&id).is_some()
    }

    fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Queues `content` for every client. Clients whose writer is gone or
    /// whose queue is full are removed.
    fn push(&self, content: &str) -> usize {
        let mut delivered = 0;
        self.clients.lock().retain(|id, client| {
            match client.tx.try_send(content.to_string()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        client_id = *id,
                        peer = %client.peer,
                        capacity = client.tx.max_capacity(),
                        "client too slow, dropping"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(client_id = *id, peer = %client.peer, "client writer gone, removing");
                    false
                }
            }
        });
        delivered
    }
}

struct Listener {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

/// Accepts WebSocket clients and fans pushed messages out to all of them.
///
/// Can be started, stopped and started again. Stopping closes the listening
/// socket only; clients already connected stay connected.
pub struct BroadcastServer {
    host: String,
    port: u16,
    clients: Arc<ClientSet>,
    listener: tokio::sync::Mutex<Option<Listener>>,
}

impl BroadcastServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            clients: Arc::new(ClientSet::default()),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    /// Binds the configured address and spawns the accept loop.
    /// Returns the bound address (useful when the configured port is 0).
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            tracing::error!("websocket server already started");
            return Err(Error::AlreadyStarted {
                component: COMPONENT,
            });
        }

        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(host = %self.host, port = local_addr.port(), "websocket server listening");

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&self.clients), shutdown_rx));
        *slot = Some(Listener {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Closes the listening socket and waits for the accept loop to end,
    /// returning any failure it produced.
    pub async fn stop(&self) -> Result<()> {
        let Some(listener) = self.listener.lock().await.take() else {
            tracing::error!("websocket server not started");
            return Err(Error::NotStarted {
                component: COMPONENT,
            });
        };

        tracing::info!("stopping websocket server");
        let _ = listener.shutdown.send(());
        listener.task.await?
    }

    /// Bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|l| l.local_addr)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Sends `content` to every connected client and returns how many it was
    /// queued for. Empty content or an empty client set is a no-op.
    pub fn push_message(&self, content: &str) -> usize {
        if content.is_empty() || self.clients.len() == 0 {
            return 0;
        }
        self.clients.push(content)
    }
}

async fn accept_loop(
    listener: TcpListener,
    clients: Arc<ClientSet>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(on_connection(stream, peer, Arc::clone(&clients)));
                }
                Err(e) if is_transient(&e) => {
                    tracing::warn!(error = %e, "transient accept failure");
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept loop failed");
                    return Err(e.into());
                }
            }
        }
    }

    tracing::info!("websocket server stopped accepting");
    Ok(())
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

/// Serves one client until it disconnects. Inbound messages are only logged.
async fn on_connection(stream: TcpStream, peer: SocketAddr, clients: Arc<ClientSet>) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };

    let (mut sink, mut source) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_CAPACITY);
    let id = clients.register(peer, tx);
    tracing::info!(client_id = id, %peer, "client connected");

    let writer_clients = Arc::clone(&clients);
    let mut writer = tokio::spawn(async move {
        while let Some(content) = rx.recv().await {
            if let Err(e) = sink.send(Message::text(content)).await {
                tracing::warn!(client_id = id, error = %e, "send failed, dropping client");
                writer_clients.unregister(id);
                break;
            }
        }
    });

    // The writer ends when its queue is dropped (client evicted) or a send
    // fails; either way the connection is closed.
    loop {
        tokio::select! {
            _ = &mut writer => break,
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    tracing::info!(client_id = id, message = text.as_str(), "inbound message ignored");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client_id = id, error = %e, "receive failed");
                    break;
                }
            }
        }
    }

    clients.unregister(id);
    writer.abort();
    tracing::info!(client_id = id, %peer, "client disconnected");
}
