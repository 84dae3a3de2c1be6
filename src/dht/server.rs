use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sha1::{Digest, Sha1};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::DhtError;
use super::message::{DhtMessage, DhtQuery, DhtResponse};
use super::node::{Node, NodeId};
use super::routing::{RoutingTable, K};
use super::storage::PeerStore;
use crate::config::DhtConfig;
use crate::metainfo::InfoHash;

const MAX_PENDING_QUERIES: usize = 256;
const TOKEN_ROTATION: Duration = Duration::from_secs(5 * 60);
const BUCKET_REFRESH: Duration = Duration::from_secs(15 * 60);

struct TokenSecrets {
    current: [u8; 16],
    previous: [u8; 16],
}

impl TokenSecrets {
    fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    fn rotate(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
    }
}

/// A Kademlia DHT node ([BEP-5]).
///
/// Owns the UDP socket, the routing table, and the transient peer store.
/// Outbound queries are correlated to responses by random 2-byte
/// transaction ids; inbound queries (`ping`, `find_node`, `get_peers`,
/// `announce_peer`) are answered from the routing table and peer store.
///
/// # Examples
///
/// ```no_run
/// use torrin::config::DhtConfig;
/// use torrin::dht::DhtNode;
/// use torrin::metainfo::InfoHash;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dht = DhtNode::bind(DhtConfig::default()).await?;
/// dht.start();
/// dht.bootstrap().await?;
///
/// let info_hash = InfoHash::from_bytes([0u8; 20]);
/// let peers = dht.lookup_peers(info_hash).await?;
/// # Ok(())
/// # }
/// ```
///
/// [BEP-5]: http://bittorrent.org/beps/bep_0005.html
pub struct DhtNode {
    socket: UdpSocket,
    own_id: NodeId,
    routing: RoutingTable,
    store: PeerStore,
    pending: Mutex<HashMap<Bytes, oneshot::Sender<DhtResponse>>>,
    token_secrets: RwLock<TokenSecrets>,
    config: DhtConfig,
    port: u16,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DhtNode {
    /// Binds the UDP socket and generates a fresh node id.
    pub async fn bind(config: DhtConfig) -> Result<Arc<Self>, DhtError> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        let port = socket.local_addr()?.port();
        let own_id = NodeId::generate();

        info!(%own_id, port, "dht node bound");

        Ok(Arc::new(Self {
            socket,
            own_id,
            routing: RoutingTable::new(own_id),
            store: PeerStore::new(),
            pending: Mutex::new(HashMap::new()),
            token_secrets: RwLock::new(TokenSecrets::new()),
            config,
            port,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn own_id(&self) -> &NodeId {
        &self.own_id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing
    }

    /// Starts the receive loop and the maintenance timers.
    pub fn start(self: &Arc<Self>) {
        let recv_task = {
            let node = self.clone();
            tokio::spawn(async move { node.recv_loop().await })
        };

        let maintenance_task = {
            let node = self.clone();
            tokio::spawn(async move { node.maintenance_loop().await })
        };

        self.tasks.lock().extend([recv_task, maintenance_task]);
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Contacts the configured seed nodes, ignoring per-host failures,
    /// then walks toward our own id to populate the routing table.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<(), DhtError> {
        info!("starting dht bootstrap");

        for host in &self.config.bootstrap_nodes {
            match tokio::net::lookup_host(host.as_str()).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.find(|a| a.is_ipv4()) {
                        if let Err(e) = self.query(addr, DhtQuery::Ping).await {
                            debug!(%host, error = %e, "bootstrap ping failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(%host, error = %e, "failed to resolve bootstrap node");
                }
            }
        }

        let own_id = self.own_id;
        let _ = self.find_node(own_id).await;

        info!(
            nodes = self.routing.node_count(),
            "dht bootstrap complete"
        );
        Ok(())
    }

    /// Sends one query and awaits its response, correlated by transaction
    /// id. Times out after the configured per-query deadline; a KRPC error
    /// envelope surfaces as [`DhtError::Remote`].
    pub(crate) async fn query(
        &self,
        addr: SocketAddr,
        query: DhtQuery,
    ) -> Result<DhtResponse, DhtError> {
        let (tid, rx) = {
            let mut pending = self.pending.lock();
            if pending.len() >= MAX_PENDING_QUERIES {
                return Err(DhtError::RateLimited);
            }

            // Collisions are rare with 2-byte ids; just redraw.
            let tid = loop {
                let candidate: [u8; 2] = rand::random();
                let candidate = Bytes::copy_from_slice(&candidate);
                if !pending.contains_key(&candidate) {
                    break candidate;
                }
            };

            let (tx, rx) = oneshot::channel();
            pending.insert(tid.clone(), tx);
            (tid, rx)
        };

        let msg = DhtMessage::query(tid.clone(), &self.own_id, query);
        self.socket.send_to(&msg.encode(), addr).await?;

        let result = timeout(self.config.query_timeout, rx).await;
        match result {
            Ok(Ok(DhtResponse::Error { code, message })) => {
                Err(DhtError::Remote { code, message })
            }
            Ok(Ok(response)) => Ok(response),
            _ => {
                // Timed out or the node shut down; free the slot.
                self.pending.lock().remove(&tid);
                Err(DhtError::Timeout)
            }
        }
    }

    async fn recv_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65535];

        loop {
            let (n, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "dht socket receive failed");
                    continue;
                }
            };

            match DhtMessage::parse(&buf[..n]) {
                Ok(msg) => self.handle_message(msg, addr).await,
                Err(e) => {
                    debug!(%addr, error = %e, "ignoring malformed dht packet");
                }
            }
        }
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut token_timer = tokio::time::interval(TOKEN_ROTATION);
        let mut refresh_timer = tokio::time::interval(BUCKET_REFRESH);
        token_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        refresh_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        token_timer.tick().await;
        refresh_timer.tick().await;

        loop {
            tokio::select! {
                _ = token_timer.tick() => {
                    self.token_secrets.write().rotate();
                    debug!("dht token secret rotated");
                }
                _ = refresh_timer.tick() => {
                    self.refresh_stale_buckets().await;
                }
            }
        }
    }

    async fn refresh_stale_buckets(self: &Arc<Self>) {
        let stale = self.routing.stale_buckets();
        if stale.is_empty() {
            return;
        }

        debug!(count = stale.len(), "refreshing stale dht buckets");
        for bucket in stale {
            let target = self.random_id_in_bucket(bucket);
            let _ = self.find_node(target).await;
        }
    }

    // A random id whose distance from ours falls in the given bucket:
    // flip the bucket's bit, randomize everything below it.
    fn random_id_in_bucket(&self, bucket: usize) -> NodeId {
        if bucket >= 160 {
            return NodeId::generate();
        }

        let mut id = self.own_id.0;
        let byte = 19 - bucket / 8;
        let bit = bucket % 8;

        id[byte] ^= 1 << bit;

        let low_mask = (1u8 << bit) - 1;
        let random: u8 = rand::random();
        id[byte] = (id[byte] & !low_mask) | (random & low_mask);

        for b in id.iter_mut().skip(byte + 1) {
            *b = rand::random();
        }

        NodeId(id)
    }

    async fn handle_message(&self, msg: DhtMessage, addr: SocketAddr) {
        // Any valid message teaches us about its sender.
        if let Some(id) = msg.sender_id {
            self.routing.insert(Node::new(id, addr));
        }

        if let Some(response) = msg.response {
            let waiter = self.pending.lock().remove(&msg.transaction_id);
            if let Some(waiter) = waiter {
                let _ = waiter.send(response);
            }
            return;
        }

        if let Some(query) = msg.query {
            let reply = self.answer_query(query, addr);
            let reply = DhtMessage::response(msg.transaction_id, reply);
            if let Err(e) = self.socket.send_to(&reply.encode(), addr).await {
                debug!(%addr, error = %e, "failed to send dht reply");
            }
        }
    }

    fn answer_query(&self, query: DhtQuery, addr: SocketAddr) -> DhtResponse {
        match query {
            DhtQuery::Ping => DhtResponse::Ping { id: self.own_id },
            DhtQuery::FindNode { target } => DhtResponse::FindNode {
                id: self.own_id,
                nodes: self.routing.closest_nodes(&target, K),
            },
            DhtQuery::GetPeers { info_hash } => {
                let info_hash = InfoHash::from_bytes(info_hash);
                let target = NodeId(*info_hash.as_bytes());
                let token = self.generate_token(&addr);

                let peers = self.store.peers_for(&info_hash);
                let peers = if peers.is_empty() { None } else { Some(peers) };

                // Peers when we have them, closest nodes either way.
                DhtResponse::GetPeers {
                    id: self.own_id,
                    token,
                    peers,
                    nodes: Some(self.routing.closest_nodes(&target, K)),
                }
            }
            DhtQuery::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            } => {
                if !self.validate_token(&addr, &token) {
                    debug!(%addr, "rejecting announce_peer with invalid token");
                    return DhtResponse::Error {
                        code: 203,
                        message: "Invalid token".to_string(),
                    };
                }

                // implied_port means the UDP source port wins.
                let peer_port = if implied_port { addr.port() } else { port };
                let peer_addr = SocketAddr::new(addr.ip(), peer_port);
                self.store
                    .add_peer(InfoHash::from_bytes(info_hash), peer_addr);
                debug!(%peer_addr, "stored announced peer");

                DhtResponse::AnnouncePeer { id: self.own_id }
            }
        }
    }

    // Tokens are bound to the querier's IP and a rotating secret; the
    // previous secret stays valid across one rotation.
    fn generate_token(&self, addr: &SocketAddr) -> Bytes {
        token_for(&self.token_secrets.read().current, addr)
    }

    fn validate_token(&self, addr: &SocketAddr, token: &Bytes) -> bool {
        let secrets = self.token_secrets.read();
        token_for(&secrets.current, addr) == *token || token_for(&secrets.previous, addr) == *token
    }

    /// The peer store, as consulted when answering `get_peers`.
    pub fn peer_store(&self) -> &PeerStore {
        &self.store
    }
}

fn token_for(secret: &[u8; 16], addr: &SocketAddr) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(addr.ip().to_string().as_bytes());
    Bytes::copy_from_slice(&hasher.finalize()[..8])
}
