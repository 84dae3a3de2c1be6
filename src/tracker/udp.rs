use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng as _;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use super::error::TrackerError;
use super::response::{parse_compact_peers, AnnounceResponse, TrackerEvent};

const PROTOCOL_MAGIC: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;
// Each protocol step gets its own deadline.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything an announce reports about us.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: TrackerEvent,
    /// TCP port we accept peers on.
    pub port: u16,
    /// Peers wanted; -1 lets the tracker choose.
    pub num_want: i32,
}

/// A UDP tracker client ([BEP-15]).
///
/// [`connect`](UdpTracker::connect) resolves the tracker's hostname and
/// performs the `connect` step; [`announce`](UdpTracker::announce) runs
/// the second step using the obtained connection id.
pub struct UdpTracker {
    socket: UdpSocket,
    addr: SocketAddr,
    connection_id: u64,
}

impl UdpTracker {
    /// Resolves a `udp://host:port` URL and performs the connect step.
    pub async fn connect(url: &str) -> Result<Self, TrackerError> {
        let addr = resolve_udp_url(url).await?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;

        let transaction_id: u32 = rand::rng().random();

        let mut request = Vec::with_capacity(16);
        request.extend_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
        request.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        request.extend_from_slice(&transaction_id.to_be_bytes());

        let response = exchange(&socket, &request, 16).await?;
        check_header(&response, ACTION_CONNECT, transaction_id)?;

        let connection_id = u64::from_be_bytes(
            response[8..16]
                .try_into()
                .map_err(|_| TrackerError::InvalidResponse("short connect response".into()))?,
        );

        debug!(%addr, "udp tracker connected");

        Ok(Self {
            socket,
            addr,
            connection_id,
        })
    }

    /// Announces our state and returns the peers the tracker hands back.
    pub async fn announce(
        &self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let transaction_id: u32 = rand::rng().random();
        let key: u32 = rand::rng().random();

        let mut packet = Vec::with_capacity(98);
        packet.extend_from_slice(&self.connection_id.to_be_bytes());
        packet.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
        packet.extend_from_slice(&transaction_id.to_be_bytes());
        packet.extend_from_slice(&request.info_hash);
        packet.extend_from_slice(&request.peer_id);
        packet.extend_from_slice(&request.downloaded.to_be_bytes());
        packet.extend_from_slice(&request.left.to_be_bytes());
        packet.extend_from_slice(&request.uploaded.to_be_bytes());
        packet.extend_from_slice(&request.event.as_udp_id().to_be_bytes());
        packet.extend_from_slice(&0u32.to_be_bytes()); // IP: let the tracker use the source
        packet.extend_from_slice(&key.to_be_bytes());
        packet.extend_from_slice(&request.num_want.to_be_bytes());
        packet.extend_from_slice(&request.port.to_be_bytes());

        let response = exchange(&self.socket, &packet, 20).await?;

        let action = be_u32(&response[0..4]);
        if action == ACTION_ERROR {
            let message = String::from_utf8_lossy(&response[8..]).to_string();
            return Err(TrackerError::Failure(message));
        }
        check_header(&response, ACTION_ANNOUNCE, transaction_id)?;

        let mut result = AnnounceResponse::new(be_u32(&response[8..12]));
        result.leechers = Some(be_u32(&response[12..16]));
        result.seeders = Some(be_u32(&response[16..20]));
        result.peers = parse_compact_peers(&response[20..]);

        Ok(result)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

async fn exchange(
    socket: &UdpSocket,
    request: &[u8],
    min_response_size: usize,
) -> Result<Vec<u8>, TrackerError> {
    socket.send(request).await?;

    let mut buf = vec![0u8; 2048];
    match timeout(STEP_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(Ok(n)) if n >= min_response_size => {
            buf.truncate(n);
            Ok(buf)
        }
        Ok(Ok(_)) => Err(TrackerError::InvalidResponse("response too short".into())),
        Ok(Err(e)) => Err(TrackerError::Io(e)),
        Err(_) => Err(TrackerError::Timeout),
    }
}

fn check_header(response: &[u8], action: u32, transaction_id: u32) -> Result<(), TrackerError> {
    if be_u32(&response[0..4]) != action || be_u32(&response[4..8]) != transaction_id {
        return Err(TrackerError::InvalidResponse(
            "action/transaction mismatch".into(),
        ));
    }
    Ok(())
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

async fn resolve_udp_url(url: &str) -> Result<SocketAddr, TrackerError> {
    let rest = url
        .strip_prefix("udp://")
        .ok_or_else(|| TrackerError::UnsupportedProtocol(url.to_string()))?;

    let host_port = rest.split('/').next().unwrap_or(rest);

    lookup_host(host_port)
        .await
        .map_err(|_| TrackerError::InvalidUrl(url.to_string()))?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))
}
