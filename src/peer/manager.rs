//! Per-torrent peer orchestration.
//!
//! The manager owns the connection pool for one torrent and is the single
//! writer of all per-peer state: transports queue events, the manager
//! consumes them one at a time and routes messages into the picker,
//! assembler, metadata exchange, and store.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng as _;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::assembler::{PieceAssembler, VerifyOutcome, BLOCK_SIZE};
use super::bitfield::Bitfield;
use super::message::Message;
use super::metadata::{
    metadata_piece_size, MetadataEvent, MetadataExchange, MetadataMessage, METADATA_PIECE_SIZE,
};
use super::peer_id::PeerId;
use super::picker::PiecePicker;
use super::state::{BlockRequest, PeerState};
use super::transport::{PeerEvent, PeerLink};
use crate::config::TorrentConfig;
use crate::metainfo::{InfoHash, TorrentInfo};
use crate::storage::PieceStore;

// Rate-ranked unchoke slots; the optimistic slot is separate.
const UNCHOKE_SLOTS: usize = 4;
// Largest block a peer may request from us.
const MAX_REQUEST_LENGTH: u32 = 128 * 1024;
// Keep-alive cadence, comfortably under the two-minute idle cutoff.
const KEEPALIVE_TICKS: u32 = 18;

// Deferred store I/O, performed after the state lock is released.
enum IoAction {
    WritePiece {
        index: u32,
        data: Bytes,
    },
    ServeBlock {
        index: u32,
        begin: u32,
        length: u32,
        reply: mpsc::UnboundedSender<Message>,
    },
}

struct ActivePeer {
    link: PeerLink,
    state: PeerState,
    metadata: MetadataExchange,
    // Bitfield/have messages that arrived before we had the metadata.
    early_bitfield: Option<Bytes>,
    early_haves: Vec<u32>,
    // Availability registered with the picker (undone on disconnect).
    counted: bool,
    downloaded: u64,
    uploaded: u64,
    down_window: u64,
    up_window: u64,
    download_rate: f64,
    upload_rate: f64,
}

enum PeerSlot {
    Connecting,
    Active(Box<ActivePeer>),
}

struct DownloadState {
    assembler: PieceAssembler,
    picker: PiecePicker,
    store: Arc<dyn PieceStore>,
}

struct Inner {
    peers: HashMap<SocketAddr, PeerSlot>,
    download: Option<DownloadState>,
    info: Option<Arc<TorrentInfo>>,
    optimistic: Option<SocketAddr>,
    last_optimistic: Instant,
    downloaded: u64,
    uploaded: u64,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the pool of peer connections for one torrent.
///
/// All mutation of peer state happens on the manager's event loop, one
/// event at a time; different torrents' managers run fully in parallel.
/// The manager drives request pipelining, the choking algorithm, HAVE
/// broadcast, metadata exchange, and the timeout sweep.
pub struct PeerManager {
    info_hash: InfoHash,
    our_id: PeerId,
    config: TorrentConfig,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<PeerEvent>,
    metadata_tx: watch::Sender<Option<Arc<TorrentInfo>>>,
    completion_tx: watch::Sender<bool>,
}

impl PeerManager {
    /// Creates the manager and starts its event and timer loops.
    pub fn new(info_hash: InfoHash, our_id: PeerId, config: TorrentConfig) -> Arc<Self> {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (metadata_tx, _) = watch::channel(None);
        let (completion_tx, _) = watch::channel(false);

        let manager = Arc::new(Self {
            info_hash,
            our_id,
            config,
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
                download: None,
                info: None,
                optimistic: None,
                last_optimistic: Instant::now(),
                downloaded: 0,
                uploaded: 0,
                tasks: Vec::new(),
            }),
            events,
            metadata_tx,
            completion_tx,
        });

        let event_task = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let mut events_rx = events_rx;
                while let Some(event) = events_rx.recv().await {
                    manager.handle_event(event).await;
                }
            })
        };

        let tick_task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.tick_loop().await })
        };

        manager.inner.lock().tasks.extend([event_task, tick_task]);
        manager
    }

    /// Initiates an outbound connection, de-duplicated by address and
    /// refused beyond the per-torrent connection cap.
    pub fn add_peer(self: &Arc<Self>, addr: SocketAddr) {
        {
            let mut inner = self.inner.lock();
            if inner.peers.contains_key(&addr) {
                return;
            }
            if inner.peers.len() >= self.config.max_peers {
                trace!(%addr, "peer limit reached, not connecting");
                return;
            }
            inner.peers.insert(addr, PeerSlot::Connecting);
        }

        let info_hash = *self.info_hash.as_bytes();
        let our_id = self.our_id;
        let events = self.events.clone();
        tokio::spawn(async move {
            // On success the transport queues the Connected event itself,
            // ahead of anything the peer says.
            if let Err(e) = PeerLink::connect(addr, info_hash, our_id, events.clone()).await {
                debug!(%addr, error = %e, "peer connect failed");
                let _ = events.send(PeerEvent::ConnectFailed { addr });
            }
        });
    }

    /// Adds every address in the iterator (tracker or DHT results).
    pub fn add_peers(self: &Arc<Self>, addrs: impl IntoIterator<Item = SocketAddr>) {
        for addr in addrs {
            self.add_peer(addr);
        }
    }

    /// Takes over an inbound connection; the accept-side handshake runs
    /// before the peer enters the pool.
    pub fn add_incoming(self: &Arc<Self>, stream: TcpStream) {
        let info_hash = *self.info_hash.as_bytes();
        let our_id = self.our_id;
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = PeerLink::accept(stream, info_hash, our_id, events).await {
                debug!(error = %e, "inbound handshake failed");
            }
        });
    }

    /// Installs the download stack once metadata is known, replaying any
    /// bitfields and haves that arrived before it.
    pub fn install_download(
        &self,
        info: Arc<TorrentInfo>,
        store: Arc<dyn PieceStore>,
        resume: Option<&Bitfield>,
    ) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.download.is_some() {
            return;
        }

        let piece_count = info.piece_count();
        let mut assembler =
            PieceAssembler::new(info.piece_length, info.total_size, info.pieces.clone());
        if let Some(resume) = resume {
            for index in resume.set_indices() {
                assembler.mark_complete(index as u32);
            }
        }
        let mut picker = PiecePicker::new(piece_count);

        for slot in inner.peers.values_mut() {
            let PeerSlot::Active(peer) = slot else {
                continue;
            };

            let mut bitfield = match peer.early_bitfield.take() {
                Some(bytes) => Bitfield::from_bytes(&bytes, piece_count),
                None => Bitfield::new(piece_count),
            };
            for index in peer.early_haves.drain(..) {
                bitfield.set(index as usize);
            }

            picker.add_peer_bitfield(&bitfield);
            peer.state.bitfield = bitfield;
            peer.counted = true;

            if !assembler.completed().is_empty() {
                let _ = peer
                    .link
                    .send(Message::Bitfield(assembler.completed().to_bytes()));
            }
        }

        if assembler.is_complete() {
            self.completion_tx.send_replace(true);
        }

        inner.info = Some(info.clone());
        inner.download = Some(DownloadState {
            assembler,
            picker,
            store,
        });
        self.metadata_tx.send_replace(Some(info));

        let fills: Vec<SocketAddr> = inner.peers.keys().copied().collect();
        for addr in fills {
            Self::fill_peer(inner, addr);
        }
    }

    /// Watch that resolves once metadata is available (immediately for
    /// torrents built from a metainfo file).
    pub fn metadata_watch(&self) -> watch::Receiver<Option<Arc<TorrentInfo>>> {
        self.metadata_tx.subscribe()
    }

    /// Watch that flips to true when every piece has verified.
    pub fn completion_watch(&self) -> watch::Receiver<bool> {
        self.completion_tx.subscribe()
    }

    pub fn peer_count(&self) -> usize {
        self.inner
            .lock()
            .peers
            .values()
            .filter(|slot| matches!(slot, PeerSlot::Active(_)))
            .count()
    }

    pub fn progress(&self) -> f64 {
        let inner = self.inner.lock();
        inner
            .download
            .as_ref()
            .map(|d| d.assembler.progress())
            .unwrap_or(0.0)
    }

    pub fn is_complete(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .download
            .as_ref()
            .map(|d| d.assembler.is_complete())
            .unwrap_or(false)
    }

    /// Copy of our completed-piece bitfield, once downloading.
    pub fn completed_bitfield(&self) -> Option<Bitfield> {
        let inner = self.inner.lock();
        inner
            .download
            .as_ref()
            .map(|d| d.assembler.completed().clone())
    }

    pub fn downloaded(&self) -> u64 {
        self.inner.lock().downloaded
    }

    pub fn uploaded(&self) -> u64 {
        self.inner.lock().uploaded
    }

    /// Seeds the transfer totals from resume data.
    pub fn restore_counters(&self, downloaded: u64, uploaded: u64) {
        let mut inner = self.inner.lock();
        inner.downloaded = downloaded;
        inner.uploaded = uploaded;
    }

    /// Bytes still missing, for tracker `left` reporting.
    pub fn bytes_left(&self) -> u64 {
        let inner = self.inner.lock();
        let (Some(download), Some(info)) = (&inner.download, &inner.info) else {
            return 0;
        };
        (0..info.piece_count() as u32)
            .filter(|&i| !download.assembler.has_piece(i))
            .map(|i| download.assembler.expected_piece_size(i))
            .sum()
    }

    /// Closes every connection and stops the event and timer loops.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        for slot in inner.peers.values() {
            if let PeerSlot::Active(peer) = slot {
                peer.link.close();
            }
        }
        inner.peers.clear();
    }

    async fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Connected { addr, link } => self.on_connected(addr, link),
            PeerEvent::ConnectFailed { addr } => {
                self.inner.lock().peers.remove(&addr);
            }
            PeerEvent::Message { addr, message } => self.on_message(addr, message).await,
            PeerEvent::Disconnected { addr } => self.on_disconnect(addr),
        }
    }

    fn on_connected(&self, addr: SocketAddr, link: PeerLink) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        // Inbound peers weren't reserved a slot; enforce the cap here.
        let reserved = inner.peers.contains_key(&addr);
        if !reserved && inner.peers.len() >= self.config.max_peers {
            debug!(%addr, "peer limit reached, dropping inbound connection");
            link.close();
            return;
        }

        let piece_count = inner.info.as_ref().map(|i| i.piece_count()).unwrap_or(0);

        let mut state = PeerState::new(piece_count);
        state.am_interested = true;
        let _ = link.send(Message::Interested);

        if link.supports_extensions {
            let metadata_size = inner.info.as_ref().map(|i| i.raw_info().len());
            let _ = link.send(MetadataExchange::handshake_message(metadata_size));
        }

        if let Some(download) = &inner.download {
            if !download.assembler.completed().is_empty() {
                let _ = link.send(Message::Bitfield(download.assembler.completed().to_bytes()));
            }
        }

        info!(%addr, "peer connected");

        let replaced = inner.peers.insert(
            addr,
            PeerSlot::Active(Box::new(ActivePeer {
                link,
                state,
                metadata: MetadataExchange::new(self.info_hash),
                early_bitfield: None,
                early_haves: Vec::new(),
                counted: false,
                downloaded: 0,
                uploaded: 0,
                down_window: 0,
                up_window: 0,
                download_rate: 0.0,
                upload_rate: 0.0,
            })),
        );

        // A reconnect from the same address supersedes the old link.
        if let Some(PeerSlot::Active(old)) = replaced {
            old.link.close();
        }
    }

    fn on_disconnect(&self, addr: SocketAddr) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(slot) = inner.peers.remove(&addr) else {
            return;
        };

        if let PeerSlot::Active(peer) = slot {
            if peer.counted {
                if let Some(download) = &mut inner.download {
                    download.picker.remove_peer_bitfield(&peer.state.bitfield);
                }
            }
            peer.link.close();
            debug!(
                %addr,
                downloaded = peer.downloaded,
                uploaded = peer.uploaded,
                "peer disconnected"
            );
        }

        if inner.optimistic == Some(addr) {
            inner.optimistic = None;
        }
    }

    async fn on_message(&self, addr: SocketAddr, message: Message) {
        let mut io = Vec::new();

        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            self.dispatch(inner, addr, message, &mut io);
        }

        // Store I/O happens with the lock released; ordering within the
        // peer is preserved because this loop is the only event consumer.
        for action in io {
            match action {
                IoAction::WritePiece { index, data } => {
                    let store = {
                        let inner = self.inner.lock();
                        inner.download.as_ref().map(|d| d.store.clone())
                    };
                    if let Some(store) = store {
                        if let Err(e) = store.write_piece(index, data).await {
                            warn!(piece = index, error = %e, "disk write failed");
                        }
                    }
                }
                IoAction::ServeBlock {
                    index,
                    begin,
                    length,
                    reply,
                } => {
                    let store = {
                        let inner = self.inner.lock();
                        inner.download.as_ref().map(|d| d.store.clone())
                    };
                    if let Some(store) = store {
                        match store.read_block(index, begin, length).await {
                            Ok(data) => {
                                let _ = reply.send(Message::Piece { index, begin, data });
                            }
                            Err(e) => {
                                debug!(piece = index, error = %e, "block read failed")
                            }
                        }
                    }
                }
            }
        }
    }

    fn dispatch(
        &self,
        inner: &mut Inner,
        addr: SocketAddr,
        message: Message,
        io: &mut Vec<IoAction>,
    ) {
        let Some(PeerSlot::Active(peer)) = inner.peers.get_mut(&addr) else {
            return;
        };

        match message {
            Message::Bitfield(bytes) => {
                match &mut inner.download {
                    Some(download) => {
                        let piece_count = download.picker.piece_count();
                        if peer.counted {
                            download.picker.remove_peer_bitfield(&peer.state.bitfield);
                        }
                        peer.state.bitfield = Bitfield::from_bytes(&bytes, piece_count);
                        download.picker.add_peer_bitfield(&peer.state.bitfield);
                        peer.counted = true;
                    }
                    None => peer.early_bitfield = Some(bytes),
                }
                Self::fill_peer(inner, addr);
            }
            Message::Have { piece } => {
                match &mut inner.download {
                    Some(download) => {
                        peer.state.bitfield.set(piece as usize);
                        download.picker.add_have(piece);
                    }
                    None => peer.early_haves.push(piece),
                }
                Self::fill_peer(inner, addr);
            }
            Message::Choke => {
                peer.state.peer_choking = true;
                let voided = peer.state.clear_pending();
                if !voided.is_empty() {
                    trace!(%addr, count = voided.len(), "requests voided by choke");
                }
            }
            Message::Unchoke => {
                peer.state.peer_choking = false;
                Self::fill_peer(inner, addr);
            }
            Message::Interested => peer.state.peer_interested = true,
            Message::NotInterested => peer.state.peer_interested = false,
            Message::Piece { index, begin, data } => {
                self.on_piece(inner, addr, index, begin, data, io);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                if peer.state.am_choking || length > MAX_REQUEST_LENGTH {
                    trace!(%addr, index, "ignoring request (choked or oversized)");
                    return;
                }
                let Some(download) = &inner.download else {
                    return;
                };
                if download.assembler.has_piece(index) {
                    peer.uploaded += length as u64;
                    peer.up_window += length as u64;
                    inner.uploaded += length as u64;
                    io.push(IoAction::ServeBlock {
                        index,
                        begin,
                        length,
                        reply: peer.link.message_sender(),
                    });
                }
            }
            Message::Cancel { .. } => {
                // Blocks are served immediately; there's no upload queue to
                // cancel from.
            }
            Message::Extended { id, payload } => {
                self.on_extended(inner, addr, id, &payload);
            }
            Message::KeepAlive | Message::Port(_) => {}
        }
    }

    fn on_piece(
        &self,
        inner: &mut Inner,
        addr: SocketAddr,
        index: u32,
        begin: u32,
        data: Bytes,
        io: &mut Vec<IoAction>,
    ) {
        let Some(PeerSlot::Active(peer)) = inner.peers.get_mut(&addr) else {
            return;
        };
        let Some(download) = &mut inner.download else {
            return;
        };

        let request = BlockRequest::new(index, begin, data.len() as u32);
        peer.state.complete_request(&request);
        peer.downloaded += data.len() as u64;
        peer.down_window += data.len() as u64;
        inner.downloaded += data.len() as u64;

        download.assembler.add_block(index, begin, &data);

        if download.assembler.is_ready(index) {
            match download.assembler.complete_piece(index) {
                VerifyOutcome::Verified(piece_data) => {
                    info!(piece = index, "piece verified");
                    io.push(IoAction::WritePiece {
                        index,
                        data: piece_data,
                    });

                    // Happens-before: verify precedes the HAVE broadcast.
                    for slot in inner.peers.values() {
                        if let PeerSlot::Active(other) = slot {
                            let _ = other.link.send(Message::Have { piece: index });
                        }
                    }

                    if inner
                        .download
                        .as_ref()
                        .is_some_and(|d| d.assembler.is_complete())
                    {
                        info!("all pieces verified, download complete");
                        self.completion_tx.send_replace(true);
                    }
                }
                VerifyOutcome::Corrupt => {
                    // Normal event; the picker will re-offer the piece.
                }
            }
        }

        Self::fill_peer(inner, addr);
    }

    fn on_extended(&self, inner: &mut Inner, addr: SocketAddr, id: u8, payload: &[u8]) {
        let Some(PeerSlot::Active(peer)) = inner.peers.get_mut(&addr) else {
            return;
        };

        match peer.metadata.handle_extended(id, payload) {
            Ok(MetadataEvent::Send(messages)) => {
                for message in messages {
                    let _ = peer.link.send(message);
                }
            }
            Ok(MetadataEvent::PeerRequest(piece)) => {
                let Some(reply_id) = peer.metadata.peer_metadata_id() else {
                    return;
                };
                let reply = match &inner.info {
                    Some(info) => {
                        let raw = info.raw_info();
                        let size = metadata_piece_size(piece, raw.len());
                        if size == 0 {
                            MetadataMessage::reject(piece)
                        } else {
                            let start = piece as usize * METADATA_PIECE_SIZE;
                            MetadataMessage::data(
                                piece,
                                raw.len() as u32,
                                raw.slice(start..start + size),
                            )
                        }
                    }
                    None => MetadataMessage::reject(piece),
                };
                let _ = peer.link.send(Message::Extended {
                    id: reply_id,
                    payload: reply.encode(),
                });
            }
            Ok(MetadataEvent::Complete(info)) => {
                if inner.download.is_none() {
                    info!(name = %info.name, "metadata fetched from peers");
                    self.metadata_tx.send_replace(Some(Arc::new(*info)));
                }
            }
            Ok(MetadataEvent::None) => {}
            Err(e) => {
                debug!(%addr, error = %e, "dropping peer on extension error");
                self.drop_peer(inner, addr);
            }
        }
    }

    // One fill cycle for one peer: pick one piece, pipeline requests into
    // free slots. Deeper pipelining happens as piece arrivals re-trigger
    // this.
    fn fill_peer(inner: &mut Inner, addr: SocketAddr) {
        let Some(PeerSlot::Active(peer)) = inner.peers.get_mut(&addr) else {
            return;
        };
        let Some(download) = &mut inner.download else {
            return;
        };

        if peer.state.peer_choking || !peer.state.can_request() {
            return;
        }

        let Some(piece) = download
            .picker
            .pick(download.assembler.completed(), &peer.state.bitfield)
        else {
            return;
        };

        download.assembler.start_piece(piece);

        let size = download.assembler.expected_piece_size(piece);
        let now = Instant::now();
        let mut offset = 0u32;

        while (offset as u64) < size && peer.state.can_request() {
            let length = BLOCK_SIZE.min((size - offset as u64) as u32);
            let request = BlockRequest::new(piece, offset, length);

            if !download.assembler.has_block(piece, offset)
                && peer.state.add_request(request, now)
            {
                let _ = peer.link.send(Message::Request {
                    index: piece,
                    begin: offset,
                    length,
                });
            }

            offset += length;
        }
    }

    fn drop_peer(&self, inner: &mut Inner, addr: SocketAddr) {
        if let Some(PeerSlot::Active(peer)) = inner.peers.remove(&addr) {
            if peer.counted {
                if let Some(download) = &mut inner.download {
                    download.picker.remove_peer_bitfield(&peer.state.bitfield);
                }
            }
            peer.link.close();
        }
        if inner.optimistic == Some(addr) {
            inner.optimistic = None;
        }
    }

    async fn tick_loop(self: Arc<Self>) {
        // Sweep at 5s, or faster when the choke interval is shorter.
        let sweep_period = Duration::from_secs(5).min(self.config.choke_interval);
        let choke_every = (self.config.choke_interval.as_secs_f64()
            / sweep_period.as_secs_f64())
        .round()
        .max(1.0) as u32;

        let mut interval = tokio::time::interval(sweep_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut tick = 0u32;

        loop {
            interval.tick().await;
            tick = tick.wrapping_add(1);

            self.sweep_timeouts();

            if tick % choke_every == 0 {
                self.choke_tick();
            }

            if tick % KEEPALIVE_TICKS == 0 {
                let inner = self.inner.lock();
                for slot in inner.peers.values() {
                    if let PeerSlot::Active(peer) = slot {
                        let _ = peer.link.send(Message::KeepAlive);
                    }
                }
            }
        }
    }

    // Evict requests older than the block timeout and re-fill the affected
    // peers; the forfeited pieces stay with the picker for re-offering.
    fn sweep_timeouts(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        let mut affected = Vec::new();

        for (addr, slot) in inner.peers.iter_mut() {
            if let PeerSlot::Active(peer) = slot {
                let expired = peer.state.take_timed_out(now, self.config.block_timeout);
                if !expired.is_empty() {
                    debug!(%addr, count = expired.len(), "block requests timed out");
                    affected.push(*addr);
                }
            }
        }

        for addr in affected {
            Self::fill_peer(inner, addr);
        }
    }

    // Rate-based choking: unchoke the top four peers by observed transfer
    // rate, plus one optimistic slot rotated on its own timer so a new
    // peer periodically gets a chance to prove itself.
    fn choke_tick(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let window = self.config.choke_interval.as_secs_f64();
        let seeding = inner
            .download
            .as_ref()
            .is_some_and(|d| d.assembler.is_complete());

        let mut ranked: Vec<(SocketAddr, f64, bool)> = Vec::new();
        for (addr, slot) in inner.peers.iter_mut() {
            if let PeerSlot::Active(peer) = slot {
                peer.download_rate = peer.down_window as f64 / window;
                peer.upload_rate = peer.up_window as f64 / window;
                peer.down_window = 0;
                peer.up_window = 0;

                let rate = if seeding {
                    peer.upload_rate
                } else {
                    peer.download_rate
                };
                ranked.push((*addr, rate, peer.state.peer_interested));
            }
        }

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let top: HashSet<SocketAddr> = ranked
            .iter()
            .filter(|(_, _, interested)| *interested)
            .take(UNCHOKE_SLOTS)
            .map(|(addr, _, _)| *addr)
            .collect();

        let rotate = inner.last_optimistic.elapsed() >= self.config.optimistic_interval;
        let optimistic_gone = inner
            .optimistic
            .is_none_or(|addr| !inner.peers.contains_key(&addr));
        if rotate || optimistic_gone {
            let candidates: Vec<SocketAddr> = ranked
                .iter()
                .filter(|(addr, _, interested)| *interested && !top.contains(addr))
                .map(|(addr, _, _)| *addr)
                .collect();
            inner.optimistic = if candidates.is_empty() {
                None
            } else {
                Some(candidates[rand::rng().random_range(0..candidates.len())])
            };
            inner.last_optimistic = Instant::now();
        }

        let optimistic = inner.optimistic;
        for (addr, slot) in inner.peers.iter_mut() {
            let PeerSlot::Active(peer) = slot else {
                continue;
            };
            let should_unchoke = top.contains(addr) || optimistic == Some(*addr);

            // Only transitions go on the wire.
            if should_unchoke && peer.state.am_choking {
                peer.state.am_choking = false;
                let _ = peer.link.send(Message::Unchoke);
            } else if !should_unchoke && !peer.state.am_choking {
                peer.state.am_choking = true;
                let _ = peer.link.send(Message::Choke);
            }
        }
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        for task in inner.tasks.drain(..) {
            task.abort();
        }
    }
}
