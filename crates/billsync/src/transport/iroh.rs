//! iroh transport.
//!
//! Each terminal binds an iroh endpoint whose key is derived from its public
//! id, so dialing a terminal only needs the id. A connection carries one
//! bidirectional stream of length-prefixed frames:
//!
//! ```text
//! [4-byte length BE][JSON bytes]
//! ```
//!
//! The first frame the dialer writes is its own terminal id. The acceptor
//! checks that the id hashes to the key the connection was authenticated
//! with before reporting the peer.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use iroh::endpoint::{Connection, Incoming, RecvStream, SendStream};
use iroh::{Endpoint, NodeAddr, RelayMode};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PeerLink, TransportEvent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{node_id_for, secret_key_for};
use crate::protocol::MAX_MESSAGE_SIZE;
use crate::ALPN;

type Connections = Arc<Mutex<HashMap<String, Connection>>>;

/// A terminal's iroh endpoint plus its live connections.
pub struct IrohTransport {
    id: String,
    endpoint: Endpoint,
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: Connections,
    accept_task: JoinHandle<()>,
}

impl std::fmt::Debug for IrohTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrohTransport")
            .field("id", &self.id)
            .field("node_id", &self.endpoint.node_id())
            .field("connections", &self.connections.lock().len())
            .finish()
    }
}

impl IrohTransport {
    /// Bind an endpoint for `id` and start accepting connections.
    pub async fn open(
        id: &str,
        config: &Config,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self> {
        let mut builder = Endpoint::builder()
            .secret_key(secret_key_for(id))
            .alpns(vec![ALPN.to_vec()]);
        if config.local_only {
            builder = builder.relay_mode(RelayMode::Disabled);
        }
        if config.discovery {
            if !config.local_only {
                builder = builder.discovery_n0();
            }
            builder = builder.discovery_local_network();
        }

        let endpoint = builder
            .bind()
            .await
            .map_err(|e| Error::init(format!("failed to bind iroh endpoint: {e}")))?;

        info!(id = %id, node_id = %endpoint.node_id(), "Iroh transport ready");

        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(
            endpoint.clone(),
            events.clone(),
            connections.clone(),
        ));

        Ok(Self {
            id: id.to_string(),
            endpoint,
            events,
            connections,
            accept_task,
        })
    }

    /// Our public id
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.id
    }

    /// The underlying endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Dial `remote_id` in the background.
    ///
    /// Success is reported as `Opened`; a failure as `Closed`, unless a
    /// connection to the peer came up some other way meanwhile.
    pub fn connect(&self, remote_id: &str) {
        let endpoint = self.endpoint.clone();
        let events = self.events.clone();
        let connections = self.connections.clone();
        let local_id = self.id.clone();
        let remote_id = remote_id.to_string();

        tokio::spawn(async move {
            match dial(&endpoint, &local_id, &remote_id).await {
                Ok((conn, send, recv)) => {
                    info!(peer = %remote_id, "Connected to peer");
                    spawn_link(remote_id, conn, send, recv, events, connections);
                }
                Err(e) => {
                    warn!(peer = %remote_id, error = %e, "Failed to connect to peer");
                    // The peer may have dialed us meanwhile; that link stays up
                    if connections.lock().contains_key(&remote_id) {
                        debug!(peer = %remote_id, "Keeping existing connection");
                        return;
                    }
                    let _ = events.send(TransportEvent::Closed { peer: remote_id });
                }
            }
        });
    }

    /// Close every connection and the endpoint.
    pub async fn close(&self) {
        let open: Vec<Connection> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in open {
            conn.close(0u32.into(), b"shutdown");
        }
        self.endpoint.close().await;
        self.accept_task.abort();
        info!(id = %self.id, "Iroh transport closed");
    }
}

async fn dial(
    endpoint: &Endpoint,
    local_id: &str,
    remote_id: &str,
) -> Result<(Connection, SendStream, RecvStream)> {
    let conn = endpoint
        .connect(NodeAddr::new(node_id_for(remote_id)), ALPN)
        .await
        .map_err(|e| Error::connection(format!("failed to connect to {remote_id}: {e}")))?;

    let (mut send, recv) = conn
        .open_bi()
        .await
        .map_err(|e| Error::connection(format!("failed to open stream: {e}")))?;

    write_frame(&mut send, local_id.as_bytes()).await?;
    Ok((conn, send, recv))
}

async fn accept_loop(
    endpoint: Endpoint,
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: Connections,
) {
    debug!("Accept loop started");
    while let Some(incoming) = endpoint.accept().await {
        let events = events.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            if let Err(e) = accept_one(incoming, events, connections).await {
                debug!(error = %e, "Incoming connection dropped");
            }
        });
    }
    debug!("Endpoint closed, stopping accept loop");
}

async fn accept_one(
    incoming: Incoming,
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: Connections,
) -> Result<()> {
    let conn = incoming
        .await
        .map_err(|e| Error::connection(format!("failed to accept connection: {e}")))?;

    let remote_node_id = conn
        .remote_node_id()
        .map_err(|e| Error::connection(format!("connection has no remote node id: {e}")))?;

    let (send, mut recv) = conn
        .accept_bi()
        .await
        .map_err(|e| Error::connection(format!("failed to accept stream: {e}")))?;

    let hello = read_frame(&mut recv).await?;
    let peer = String::from_utf8(hello.to_vec())
        .map_err(|e| Error::protocol(format!("invalid terminal id: {e}")))?;

    if node_id_for(&peer) != remote_node_id {
        conn.close(1u32.into(), b"identity mismatch");
        return Err(Error::identity(format!(
            "{remote_node_id} claimed terminal id {peer}"
        )));
    }

    info!(peer = %peer, "Accepted peer connection");
    let _ = events.send(TransportEvent::Connecting { peer: peer.clone() });
    spawn_link(peer, conn, send, recv, events, connections);
    Ok(())
}

/// Register the connection and run its reader and writer tasks.
fn spawn_link(
    peer: String,
    conn: Connection,
    mut send: SendStream,
    mut recv: RecvStream,
    events: mpsc::UnboundedSender<TransportEvent>,
    connections: Connections,
) {
    if let Some(previous) = connections.lock().insert(peer.clone(), conn.clone()) {
        debug!(peer = %peer, "Replacing existing connection");
        previous.close(0u32.into(), b"replaced");
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let _ = events.send(TransportEvent::Opened {
        peer: peer.clone(),
        link: PeerLink::frames(&peer, tx),
    });

    let writer_conn = conn.clone();
    let writer_peer = peer.clone();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = write_frame(&mut send, &bytes).await {
                debug!(peer = %writer_peer, error = %e, "Write failed, closing connection");
                writer_conn.close(0u32.into(), b"write failed");
                return;
            }
        }
        // Every link handle is gone: the engine dropped this connection
        let _ = send.finish();
    });

    tokio::spawn(async move {
        loop {
            match read_frame(&mut recv).await {
                Ok(bytes) => {
                    if events
                        .send(TransportEvent::Data {
                            peer: peer.clone(),
                            bytes,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Peer stream ended");
                    break;
                }
            }
        }

        let owned = {
            let mut map = connections.lock();
            let current = map
                .get(&peer)
                .is_some_and(|c| c.stable_id() == conn.stable_id());
            if current {
                map.remove(&peer);
            }
            current
        };
        conn.close(0u32.into(), b"closed");
        if owned {
            info!(peer = %peer, "Peer connection closed");
            let _ = events.send(TransportEvent::Closed { peer });
        }
    });
}

/// Write one frame.
async fn write_frame(send: &mut SendStream, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::protocol("message too large"));
    }

    let len_bytes = (payload.len() as u32).to_be_bytes();
    send.write_all(&len_bytes)
        .await
        .map_err(|e| Error::connection(format!("failed to send length: {e}")))?;
    send.write_all(payload)
        .await
        .map_err(|e| Error::connection(format!("failed to send payload: {e}")))?;
    Ok(())
}

/// Read one frame.
async fn read_frame(recv: &mut RecvStream) -> Result<Bytes> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::connection(format!("failed to read length: {e}")))?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(Error::protocol("received empty frame"));
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::protocol(format!(
            "frame too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }

    let mut payload = vec![0u8; len];
    recv.read_exact(&mut payload)
        .await
        .map_err(|e| Error::connection(format!("failed to read payload: {e}")))?;
    Ok(Bytes::from(payload))
}
