//! Peer-to-peer messaging for utxochain
//!
//! Every message travels as one frame: a big-endian `u32` body length followed
//! by the bincode encoding of a [`Message`]. Outbound transactions go through
//! the [`Transport`] trait; inbound frames are accepted by [`serve`] and
//! dispatched to the node hooks on a blocking worker.

use crate::blockchain::Block;
use crate::error::{ChainError, Result};
use crate::node::Node;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Upper bound on a frame body. Blocks carry many transactions, so this is
/// well above the single-transaction limit.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Block(Block),
    Transaction(Transaction),
}

pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ChainError::NetworkError(format!(
            "Message too large: {} bytes (max: {})",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_body(body: &[u8]) -> Result<Message> {
    Ok(bincode::deserialize(body)?)
}

/// Reads one frame. `Ok(None)` means the peer closed the connection cleanly
/// between frames.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Message>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ChainError::NetworkError(e.to_string())),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ChainError::NetworkError(format!(
            "Message too large: {} bytes (max: {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ChainError::NetworkError(e.to_string()))?;
    decode_body(&body).map(Some)
}

/// Outbound side of the network. Delivery is fire-and-forget: success means
/// the frame was handed to the peer, not that the peer accepted it.
pub trait Transport: Send + Sync {
    fn send_transaction(&self, peer: &str, tx: &Transaction) -> Result<()>;
}

/// Opens a fresh TCP connection per message.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Some(CONNECT_TIMEOUT),
        }
    }

    fn resolve(peer: &str) -> Result<SocketAddr> {
        peer.to_socket_addrs()
            .map_err(|e| ChainError::NetworkError(format!("Cannot resolve {}: {}", peer, e)))?
            .next()
            .ok_or_else(|| ChainError::NetworkError(format!("No address for {}", peer)))
    }

    fn deliver(&self, peer: &str, message: &Message) -> Result<()> {
        let frame = encode_frame(message)?;
        let addr = Self::resolve(peer)?;
        let mut stream = match self.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|e| ChainError::NetworkError(format!("Connect to {} failed: {}", peer, e)))?;

        stream
            .write_all(&frame)
            .and_then(|_| stream.flush())
            .map_err(|e| ChainError::NetworkError(format!("Write to {} failed: {}", peer, e)))
    }

    pub fn send_block(&self, peer: &str, block: &Block) -> Result<()> {
        self.deliver(peer, &Message::Block(block.clone()))
    }
}

impl Transport for TcpTransport {
    fn send_transaction(&self, peer: &str, tx: &Transaction) -> Result<()> {
        debug!("Sending transaction {} to {}", tx.id_hex(), peer);
        self.deliver(peer, &Message::Transaction(tx.clone()))
    }
}

/// Applies one inbound message to the node. Runs on a blocking worker since
/// validation, storage and mining are synchronous.
pub fn handle_message(node: &Node, message: Message) {
    match message {
        Message::Block(block) => {
            let hash = block.hash_hex();
            match node.on_receive_block(block) {
                Ok(outcome) => info!("Block {} received: {:?}", hash, outcome),
                Err(e) => warn!("Rejected block {}: {}", hash, e),
            }
        }
        Message::Transaction(tx) => {
            let id = tx.id_hex();
            match node.on_receive_transaction(tx) {
                Ok(true) => info!("Transaction {} added to mempool", id),
                Ok(false) => debug!("Transaction {} already in mempool", id),
                Err(e) => {
                    warn!("Rejected transaction {}: {}", id, e);
                    return;
                }
            }
            match node.mine_pending() {
                Ok(Some(block)) => info!("Mined block {} from mempool", block.hash_hex()),
                Ok(None) => {}
                Err(e) => warn!("Mining pending transactions failed: {}", e),
            }
        }
    }
}

/// Accepts connections until the listener fails.
pub async fn serve(node: Arc<Node>, listener: TcpListener) -> Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    loop {
        let (mut socket, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        debug!("Connection from {}", addr);

        let node = node.clone();
        tokio::spawn(async move {
            loop {
                match read_message(&mut socket).await {
                    Ok(Some(message)) => {
                        let node = node.clone();
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || handle_message(&node, message)).await
                        {
                            warn!("Handler for {} panicked: {}", addr, e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Dropping connection from {}: {}", addr, e);
                        break;
                    }
                }
            }
        });
    }
}
