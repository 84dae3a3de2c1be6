use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::TorrentError;
use super::resume::ResumeData;
use crate::config::TorrentConfig;
use crate::dht::DhtNode;
use crate::metainfo::{InfoHash, MagnetLink, TorrentInfo};
use crate::peer::{PeerId, PeerManager};
use crate::storage::{FileStore, PieceStore};
use crate::tracker::{AnnounceRequest, TrackerError, TrackerEvent, UdpTracker};

// Cadence of DHT peer lookups while running.
const DHT_LOOKUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Builds the piece store once metadata is known (magnet flow).
pub type StoreFactory = Box<dyn Fn(&TorrentInfo) -> Arc<dyn PieceStore> + Send + Sync>;

/// Where the torrent currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    /// Waiting for ut_metadata to deliver the info dictionary.
    FetchingMetadata,
    Downloading,
    Seeding,
    Paused,
    Stopped,
}

/// A point-in-time snapshot of a torrent.
#[derive(Debug, Clone)]
pub struct TorrentStatus {
    pub info_hash: InfoHash,
    pub name: Option<String>,
    pub state: TorrentState,
    /// Fraction of pieces verified, in `[0, 1]`.
    pub progress: f64,
    pub peer_count: usize,
    pub downloaded: u64,
    pub uploaded: u64,
    pub bytes_left: u64,
}

#[derive(Default)]
struct ControlState {
    announce_task: Option<JoinHandle<()>>,
    metadata_task: Option<JoinHandle<()>>,
    dht_task: Option<JoinHandle<()>>,
    paused: bool,
    stopped: bool,
}

/// Per-torrent controller.
///
/// Owns the peer manager and the announce loop. Built from a parsed
/// metainfo (download state installed up front) or a magnet link (the
/// metadata exchange bootstraps it). Peers arrive from trackers, the
/// optional DHT, and explicit [`add_peer`](Torrent::add_peer) calls.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use torrin::config::TorrentConfig;
/// use torrin::metainfo::TorrentInfo;
/// use torrin::storage::FileStore;
/// use torrin::torrent::Torrent;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let info = TorrentInfo::from_bytes(&data)?;
/// let store = Arc::new(FileStore::new("./downloads", &info));
///
/// let torrent = Torrent::from_metainfo(info, store, TorrentConfig::default());
/// torrent.start();
/// torrent.wait_for_completion(std::time::Duration::from_secs(3600)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Torrent {
    info_hash: InfoHash,
    our_id: PeerId,
    config: TorrentConfig,
    manager: Arc<PeerManager>,
    tiers: Vec<Vec<String>>,
    name_hint: Option<String>,
    save_path: Option<PathBuf>,
    dht: Mutex<Option<Arc<DhtNode>>>,
    store_factory: Mutex<Option<StoreFactory>>,
    control: Mutex<ControlState>,
}

impl Torrent {
    /// Creates a torrent from parsed metainfo, ready to download into
    /// `store`.
    pub fn from_metainfo(
        info: TorrentInfo,
        store: Arc<dyn PieceStore>,
        config: TorrentConfig,
    ) -> Arc<Self> {
        Self::build(info, store, config, None)
    }

    /// Creates a torrent from metainfo plus resume data: completed pieces
    /// are taken as verified and the announce counters carry over.
    pub fn from_metainfo_with_resume(
        info: TorrentInfo,
        store: Arc<dyn PieceStore>,
        config: TorrentConfig,
        resume: &ResumeData,
    ) -> Arc<Self> {
        Self::build(info, store, config, Some(resume))
    }

    fn build(
        info: TorrentInfo,
        store: Arc<dyn PieceStore>,
        config: TorrentConfig,
        resume: Option<&ResumeData>,
    ) -> Arc<Self> {
        let info_hash = info.info_hash;
        let our_id = PeerId::generate();
        let manager = PeerManager::new(info_hash, our_id, config.clone());

        let tiers = info.announce_tiers();
        let name_hint = Some(info.name.clone());
        let piece_count = info.piece_count();

        let resume_bitfield = resume.map(|r| r.completed_bitfield(piece_count));
        manager.install_download(Arc::new(info), store, resume_bitfield.as_ref());
        if let Some(resume) = resume {
            manager.restore_counters(resume.downloaded, resume.uploaded);
        }

        Arc::new(Self {
            info_hash,
            our_id,
            config,
            manager,
            tiers,
            name_hint,
            save_path: None,
            dht: Mutex::new(None),
            store_factory: Mutex::new(None),
            control: Mutex::new(ControlState::default()),
        })
    }

    /// Creates a torrent from a magnet link. The store is built by
    /// `store_factory` once the metadata arrives from peers.
    pub fn from_magnet(
        magnet: &MagnetLink,
        store_factory: StoreFactory,
        config: TorrentConfig,
    ) -> Arc<Self> {
        Self::magnet_build(magnet, store_factory, config, None)
    }

    /// Magnet convenience: download into plain files under `save_dir`.
    pub fn from_magnet_to_dir(
        magnet: &MagnetLink,
        save_dir: impl Into<PathBuf>,
        config: TorrentConfig,
    ) -> Arc<Self> {
        let save_dir = save_dir.into();
        let factory_dir = save_dir.clone();
        let factory: StoreFactory =
            Box::new(move |info| Arc::new(FileStore::new(factory_dir.clone(), info)));

        Self::magnet_build(magnet, factory, config, Some(save_dir))
    }

    fn magnet_build(
        magnet: &MagnetLink,
        store_factory: StoreFactory,
        config: TorrentConfig,
        save_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let info_hash = magnet.info_hash;
        let our_id = PeerId::generate();
        let manager = PeerManager::new(info_hash, our_id, config.clone());

        // Each magnet tracker forms its own tier.
        let tiers = magnet.trackers.iter().map(|t| vec![t.clone()]).collect();

        Arc::new(Self {
            info_hash,
            our_id,
            config,
            manager,
            tiers,
            name_hint: magnet.display_name.clone(),
            save_path,
            dht: Mutex::new(None),
            store_factory: Mutex::new(Some(store_factory)),
            control: Mutex::new(ControlState::default()),
        })
    }

    /// Attaches a DHT node consulted for peers while the torrent runs.
    pub fn set_dht(&self, dht: Arc<DhtNode>) {
        *self.dht.lock() = Some(dht);
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Starts the announce loop, the metadata monitor (magnet flow), and
    /// DHT discovery if attached.
    pub fn start(self: &Arc<Self>) {
        let mut control = self.control.lock();
        if control.stopped || control.announce_task.is_some() {
            return;
        }
        control.paused = false;

        control.metadata_task = Some({
            let torrent = self.clone();
            tokio::spawn(async move { torrent.metadata_monitor().await })
        });

        control.announce_task = Some({
            let torrent = self.clone();
            tokio::spawn(async move { torrent.announce_loop().await })
        });

        if self.dht.lock().is_some() {
            control.dht_task = Some({
                let torrent = self.clone();
                tokio::spawn(async move { torrent.dht_loop().await })
            });
        }

        info!(info_hash = %self.info_hash, "torrent started");
    }

    /// Pauses discovery: the reannounce loop and monitors stop, but peer
    /// connections and piece state stay for resume.
    pub fn pause(&self) {
        let mut control = self.control.lock();
        if control.paused || control.stopped {
            return;
        }
        for task in [
            control.announce_task.take(),
            control.metadata_task.take(),
            control.dht_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        control.paused = true;
        info!(info_hash = %self.info_hash, "torrent paused");
    }

    /// Restarts discovery after a pause.
    pub fn resume(self: &Arc<Self>) {
        {
            let mut control = self.control.lock();
            if !control.paused || control.stopped {
                return;
            }
            control.paused = false;
        }
        self.start();
    }

    /// Stops the torrent: a best-effort `stopped` announce goes out, every
    /// peer connection closes, and the controller won't restart.
    pub fn stop(&self) {
        {
            let mut control = self.control.lock();
            if control.stopped {
                return;
            }
            control.stopped = true;
            for task in [
                control.announce_task.take(),
                control.metadata_task.take(),
                control.dht_task.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }
        }

        let request = self.announce_request(TrackerEvent::Stopped);
        let tiers = self.tiers.clone();
        tokio::spawn(async move {
            let _ = announce_tiers(&tiers, &request).await;
        });

        self.manager.shutdown();
        info!(info_hash = %self.info_hash, "torrent stopped");
    }

    /// Hands an address straight to the peer manager.
    pub fn add_peer(&self, addr: SocketAddr) {
        self.manager.add_peer(addr);
    }

    /// Hands an accepted inbound connection to the peer manager.
    pub fn add_incoming(&self, stream: TcpStream) {
        self.manager.add_incoming(stream);
    }

    /// Waits until the metadata is known, up to `deadline`.
    ///
    /// Resolves immediately for torrents built from a metainfo file.
    pub async fn wait_for_metadata(
        &self,
        deadline: Duration,
    ) -> Result<Arc<TorrentInfo>, TorrentError> {
        let mut watch = self.manager.metadata_watch();

        timeout(deadline, async move {
            loop {
                let current = watch.borrow_and_update().clone();
                if let Some(info) = current {
                    return info;
                }
                if watch.changed().await.is_err() {
                    // Manager gone; park until the deadline fires.
                    futures::future::pending::<()>().await;
                }
            }
        })
        .await
        .map_err(|_| TorrentError::Timeout)
    }

    /// Waits until every piece has verified, up to `deadline`.
    pub async fn wait_for_completion(&self, deadline: Duration) -> Result<(), TorrentError> {
        let mut watch = self.manager.completion_watch();

        timeout(deadline, async move {
            loop {
                if *watch.borrow_and_update() {
                    return;
                }
                if watch.changed().await.is_err() {
                    futures::future::pending::<()>().await;
                }
            }
        })
        .await
        .map_err(|_| TorrentError::Timeout)
    }

    /// A point-in-time status snapshot.
    pub fn status(&self) -> TorrentStatus {
        let control = self.control.lock();
        let metadata = self.manager.metadata_watch().borrow().clone();

        let state = if control.stopped {
            TorrentState::Stopped
        } else if control.paused {
            TorrentState::Paused
        } else if metadata.is_none() {
            TorrentState::FetchingMetadata
        } else if self.manager.is_complete() {
            TorrentState::Seeding
        } else {
            TorrentState::Downloading
        };

        TorrentStatus {
            info_hash: self.info_hash,
            name: metadata
                .map(|info| info.name.clone())
                .or_else(|| self.name_hint.clone()),
            state,
            progress: self.manager.progress(),
            peer_count: self.manager.peer_count(),
            downloaded: self.manager.downloaded(),
            uploaded: self.manager.uploaded(),
            bytes_left: self.manager.bytes_left(),
        }
    }

    /// Serializable resume state, once downloading has started.
    pub fn resume_data(&self) -> Option<ResumeData> {
        let completed = self.manager.completed_bitfield()?;
        Some(ResumeData {
            info_hash: self.info_hash,
            completed_pieces: completed.to_bytes(),
            uploaded: self.manager.uploaded(),
            downloaded: self.manager.downloaded(),
            save_path: self
                .save_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        })
    }

    // Magnet flow: when the manager reports metadata, build the store and
    // install the download stack.
    async fn metadata_monitor(self: Arc<Self>) {
        let mut watch = self.manager.metadata_watch();

        loop {
            let current = watch.borrow_and_update().clone();
            if let Some(info) = current {
                let factory = self.store_factory.lock().take();
                if let Some(factory) = factory {
                    let store = factory(&info);
                    self.manager.install_download(info, store, None);
                }
                return;
            }
            if watch.changed().await.is_err() {
                return;
            }
        }
    }

    async fn announce_loop(self: Arc<Self>) {
        let mut event = TrackerEvent::Started;
        let mut completion = self.manager.completion_watch();
        let mut completed_announced = *completion.borrow_and_update();

        loop {
            let request = self.announce_request(event);
            let interval = match announce_tiers(&self.tiers, &request).await {
                Ok(Some((peers, interval))) => {
                    debug!(count = peers.len(), "tracker returned peers");
                    self.manager.add_peers(peers);
                    event = TrackerEvent::None;
                    interval
                }
                Ok(None) => {
                    // No usable trackers; rely on DHT and manual peers.
                    self.config.announce_interval
                }
                Err(e) => {
                    warn!(error = %e, "announce failed on every tier");
                    self.config.announce_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = completion.changed(), if !completed_announced => {
                    if changed.is_ok() && *completion.borrow_and_update() {
                        completed_announced = true;
                        event = TrackerEvent::Completed;
                    }
                }
            }
        }
    }

    async fn dht_loop(self: Arc<Self>) {
        let Some(dht) = self.dht.lock().clone() else {
            return;
        };

        let mut interval = tokio::time::interval(DHT_LOOKUP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            // Private torrents never touch the DHT.
            let private = self
                .manager
                .metadata_watch()
                .borrow()
                .as_ref()
                .is_some_and(|info| info.is_private);
            if private {
                return;
            }

            match dht.announce(self.info_hash, self.config.listen_port).await {
                Ok(peers) => {
                    debug!(count = peers.len(), "dht returned peers");
                    self.manager.add_peers(peers);
                }
                Err(e) => {
                    debug!(error = %e, "dht lookup failed");
                }
            }
        }
    }

    fn announce_request(&self, event: TrackerEvent) -> AnnounceRequest {
        AnnounceRequest {
            info_hash: *self.info_hash.as_bytes(),
            peer_id: *self.our_id.as_bytes(),
            downloaded: self.manager.downloaded(),
            left: self.manager.bytes_left(),
            uploaded: self.manager.uploaded(),
            event,
            port: self.config.listen_port,
            num_want: -1,
        }
    }
}

// Walks tracker tiers in order: the first URL in any tier that answers
// wins; a tier's failures fall through to the next URL and then the next
// tier. `Ok(None)` means there was nothing to try.
async fn announce_tiers(
    tiers: &[Vec<String>],
    request: &AnnounceRequest,
) -> Result<Option<(Vec<SocketAddr>, Duration)>, TorrentError> {
    let mut tried = false;

    for tier in tiers {
        for url in tier {
            if !url.starts_with("udp://") {
                debug!(%url, "skipping non-udp tracker");
                continue;
            }
            tried = true;

            match announce_one(url, request).await {
                Ok(response) => {
                    return Ok(Some((
                        response.peers,
                        Duration::from_secs(response.interval.max(60) as u64),
                    )));
                }
                Err(e) => {
                    debug!(%url, error = %e, "tracker announce failed, trying next");
                }
            }
        }
    }

    if tried {
        Err(TorrentError::ConnectionFailed)
    } else {
        Ok(None)
    }
}

async fn announce_one(
    url: &str,
    request: &AnnounceRequest,
) -> Result<crate::tracker::AnnounceResponse, TrackerError> {
    let tracker = UdpTracker::connect(url).await?;
    tracker.announce(request).await
}
