use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::codec::{WireDecoder, WireEvent};
use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// What a peer connection reports back to its manager.
///
/// The transport never calls into the manager directly; it queues events
/// and the manager consumes them one at a time, so per-peer ordering is
/// arrival order and the manager stays the single writer of its state.
#[derive(Debug)]
pub enum PeerEvent {
    /// An outbound connect finished its handshake.
    Connected { addr: SocketAddr, link: PeerLink },
    /// An outbound connect failed before completing its handshake.
    ConnectFailed { addr: SocketAddr },
    /// A decoded message arrived from the peer.
    Message { addr: SocketAddr, message: Message },
    /// The connection is gone (EOF, I/O error, or protocol violation).
    Disconnected { addr: SocketAddr },
}

/// One live TCP connection to a peer.
///
/// After the handshake the stream is split: a reader task decodes frames
/// and queues [`PeerEvent`]s, a writer task drains the outbound queue in
/// enqueue order. Dropping or closing the link tears both down.
#[derive(Debug)]
pub struct PeerLink {
    pub addr: SocketAddr,
    pub peer_id: PeerId,
    /// Whether the peer's handshake advertised BEP-10 extensions.
    pub supports_extensions: bool,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PeerLink {
    /// Connects out to a peer and performs the handshake: ours first, then
    /// theirs, which must carry the same info hash.
    ///
    /// On success the link is delivered through the event queue as a
    /// [`PeerEvent::Connected`], strictly before any message from the
    /// peer.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_id: PeerId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(), PeerError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;

        Self::handshake(stream, addr, info_hash, our_id, events, true).await
    }

    /// Takes over an accepted inbound connection: their handshake first
    /// (it must carry our info hash), then ours in reply. Delivery is the
    /// same as [`connect`](PeerLink::connect).
    pub async fn accept(
        stream: TcpStream,
        info_hash: [u8; 20],
        our_id: PeerId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(), PeerError> {
        let addr = stream.peer_addr()?;
        Self::handshake(stream, addr, info_hash, our_id, events, false).await
    }

    async fn handshake(
        mut stream: TcpStream,
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_id: PeerId,
        events: mpsc::UnboundedSender<PeerEvent>,
        outbound_first: bool,
    ) -> Result<(), PeerError> {
        let ours = Handshake::new(info_hash, *our_id.as_bytes());

        if outbound_first {
            timeout(WRITE_TIMEOUT, stream.write_all(&ours.encode()))
                .await
                .map_err(|_| PeerError::Timeout)??;
        }

        let mut decoder = WireDecoder::new();
        let theirs = timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut stream, &mut decoder))
            .await
            .map_err(|_| PeerError::Timeout)??;

        if theirs.info_hash != info_hash {
            return Err(PeerError::InfoHashMismatch);
        }

        if !outbound_first {
            timeout(WRITE_TIMEOUT, stream.write_all(&ours.encode()))
                .await
                .map_err(|_| PeerError::Timeout)??;
        }

        let peer_id =
            PeerId::from_bytes(&theirs.peer_id).ok_or(PeerError::InvalidHandshake)?;
        let supports_extensions = theirs.supports_extension_protocol();

        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        // The reader holds at the gate until the Connected event carrying
        // this link is enqueued, so no Message event can outrun it. The
        // decoder may already hold frames that arrived with the handshake
        // bytes; the reader picks up where we left off.
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let reader = {
            let events = events.clone();
            tokio::spawn(async move {
                if gate_rx.await.is_err() {
                    return;
                }
                read_loop(read_half, decoder, addr, events).await
            })
        };
        let writer = tokio::spawn(write_loop(write_half, outbound_rx, addr));

        debug!(%addr, ?peer_id, supports_extensions, "peer handshake complete");

        let link = Self {
            addr,
            peer_id,
            supports_extensions,
            outbound,
            reader,
            writer,
        };

        if events.send(PeerEvent::Connected { addr, link }).is_err() {
            return Err(PeerError::NotConnected);
        }
        let _ = gate_tx.send(());
        Ok(())
    }

    /// Queues a message for sending. Messages go out in enqueue order.
    pub fn send(&self, message: Message) -> Result<(), PeerError> {
        self.outbound
            .send(message)
            .map_err(|_| PeerError::NotConnected)
    }

    /// A clone of the outbound queue, for sends that outlive a borrow of
    /// the link.
    pub fn message_sender(&self) -> mpsc::UnboundedSender<Message> {
        self.outbound.clone()
    }

    /// Tears down both halves of the connection.
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_handshake(
    stream: &mut TcpStream,
    decoder: &mut WireDecoder,
) -> Result<Handshake, PeerError> {
    let mut chunk = BytesMut::with_capacity(4096);

    loop {
        if let Some(WireEvent::Handshake(hs)) = decoder.next()? {
            return Ok(hs);
        }

        let n = stream.read_buf(&mut chunk).await?;
        if n == 0 {
            return Err(PeerError::ConnectionClosed);
        }
        decoder.feed(&chunk);
        chunk.clear();
    }
}

async fn read_loop(
    mut stream: OwnedReadHalf,
    mut decoder: WireDecoder,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let mut chunk = BytesMut::with_capacity(32 * 1024);

    'outer: loop {
        // Drain every complete frame before reading more bytes.
        loop {
            match decoder.next() {
                Ok(Some(WireEvent::Message(message))) => {
                    if events.send(PeerEvent::Message { addr, message }).is_err() {
                        break 'outer;
                    }
                }
                Ok(Some(WireEvent::Handshake(_))) => {
                    // A second handshake can't happen; the decoder only
                    // yields one.
                    break 'outer;
                }
                Ok(None) => break,
                Err(e) => {
                    trace!(%addr, error = %e, "dropping peer on decode error");
                    break 'outer;
                }
            }
        }

        match timeout(READ_TIMEOUT, stream.read_buf(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(_)) => {
                decoder.feed(&chunk);
                chunk.clear();
            }
        }
    }

    let _ = events.send(PeerEvent::Disconnected { addr });
}

async fn write_loop(
    mut stream: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    addr: SocketAddr,
) {
    while let Some(message) = outbound.recv().await {
        let data = message.encode();
        match timeout(WRITE_TIMEOUT, stream.write_all(&data)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "write failed");
                break;
            }
            Err(_) => {
                trace!(%addr, "write timed out");
                break;
            }
        }
    }
}
