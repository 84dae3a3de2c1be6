use std::net::SocketAddr;

use bytes::Bytes;

use super::error::DhtError;
use super::node::{Node, NodeId};
use crate::bencode::{decode, encode, Value};

pub type TransactionId = Bytes;

/// The four KRPC queries.
#[derive(Debug, Clone)]
pub enum DhtQuery {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: [u8; 20],
    },
    AnnouncePeer {
        info_hash: [u8; 20],
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
}

impl DhtQuery {
    pub fn name(&self) -> &'static str {
        match self {
            DhtQuery::Ping => "ping",
            DhtQuery::FindNode { .. } => "find_node",
            DhtQuery::GetPeers { .. } => "get_peers",
            DhtQuery::AnnouncePeer { .. } => "announce_peer",
        }
    }
}

/// KRPC response payloads.
///
/// The wire format doesn't tag which query a response answers; the shape
/// is inferred from which keys are present.
#[derive(Debug, Clone)]
pub enum DhtResponse {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        nodes: Vec<Node>,
    },
    GetPeers {
        id: NodeId,
        token: Bytes,
        peers: Option<Vec<SocketAddr>>,
        nodes: Option<Vec<Node>>,
    },
    AnnouncePeer {
        id: NodeId,
    },
    Error {
        code: i64,
        message: String,
    },
}

/// One KRPC envelope: a bencoded dict with a transaction id and either a
/// query, a response, or an error.
#[derive(Debug, Clone)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub sender_id: Option<NodeId>,
    pub query: Option<DhtQuery>,
    pub response: Option<DhtResponse>,
}

impl DhtMessage {
    pub fn query(transaction_id: TransactionId, own_id: &NodeId, query: DhtQuery) -> Self {
        Self {
            transaction_id,
            sender_id: Some(*own_id),
            query: Some(query),
            response: None,
        }
    }

    pub fn response(transaction_id: TransactionId, response: DhtResponse) -> Self {
        Self {
            transaction_id,
            sender_id: None,
            query: None,
            response: Some(response),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;

        if value.as_dict().is_none() {
            return Err(DhtError::InvalidMessage("expected dict".into()));
        }

        let transaction_id = value
            .get(b"t")
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| DhtError::InvalidMessage("missing transaction id".into()))?;

        let msg_type = value
            .get(b"y")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::InvalidMessage("missing message type".into()))?;

        match msg_type {
            "q" => Self::parse_query(transaction_id, &value),
            "r" => Self::parse_response(transaction_id, &value),
            "e" => Self::parse_error(transaction_id, &value),
            other => Err(DhtError::InvalidMessage(format!(
                "unknown message type: {}",
                other
            ))),
        }
    }

    fn parse_query(transaction_id: TransactionId, value: &Value) -> Result<Self, DhtError> {
        let query_name = value
            .get(b"q")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::InvalidMessage("missing query name".into()))?;

        let args = value
            .get(b"a")
            .ok_or_else(|| DhtError::InvalidMessage("missing query args".into()))?;

        let sender_id = args
            .get(b"id")
            .and_then(|v| v.as_bytes())
            .and_then(|b| NodeId::from_bytes(b).ok());

        let info_hash_arg = || {
            args.get(b"info_hash")
                .and_then(|v| v.as_bytes())
                .filter(|b| b.len() == 20)
                .map(|b| {
                    let mut hash = [0u8; 20];
                    hash.copy_from_slice(b);
                    hash
                })
                .ok_or_else(|| DhtError::InvalidMessage("missing info_hash".into()))
        };

        let query = match query_name {
            "ping" => DhtQuery::Ping,
            "find_node" => {
                let target = args
                    .get(b"target")
                    .and_then(|v| v.as_bytes())
                    .and_then(|b| NodeId::from_bytes(b).ok())
                    .ok_or_else(|| DhtError::InvalidMessage("missing target".into()))?;
                DhtQuery::FindNode { target }
            }
            "get_peers" => DhtQuery::GetPeers {
                info_hash: info_hash_arg()?,
            },
            "announce_peer" => {
                let port = args
                    .get(b"port")
                    .and_then(|v| v.as_integer())
                    .ok_or_else(|| DhtError::InvalidMessage("missing port".into()))?
                    as u16;

                let token = args
                    .get(b"token")
                    .and_then(|v| v.as_bytes())
                    .cloned()
                    .ok_or_else(|| DhtError::InvalidMessage("missing token".into()))?;

                let implied_port = args
                    .get(b"implied_port")
                    .and_then(|v| v.as_integer())
                    .map(|v| v == 1)
                    .unwrap_or(false);

                DhtQuery::AnnouncePeer {
                    info_hash: info_hash_arg()?,
                    port,
                    token,
                    implied_port,
                }
            }
            other => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown query: {}",
                    other
                )))
            }
        };

        Ok(Self {
            transaction_id,
            sender_id,
            query: Some(query),
            response: None,
        })
    }

    fn parse_response(transaction_id: TransactionId, value: &Value) -> Result<Self, DhtError> {
        let results = value
            .get(b"r")
            .ok_or_else(|| DhtError::InvalidMessage("missing response dict".into()))?;

        let sender_id = results
            .get(b"id")
            .and_then(|v| v.as_bytes())
            .and_then(|b| NodeId::from_bytes(b).ok())
            .ok_or_else(|| DhtError::InvalidMessage("missing id in response".into()))?;

        let nodes = results.get(b"nodes").and_then(|v| v.as_bytes()).map(|data| {
            data.chunks_exact(26)
                .filter_map(Node::from_compact)
                .collect::<Vec<_>>()
        });

        let peers = results.get(b"values").and_then(|v| v.as_list()).map(|list| {
            list.iter()
                .filter_map(|v| v.as_bytes())
                .filter(|b| b.len() == 6)
                .map(|b| {
                    let ip = std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]);
                    let port = u16::from_be_bytes([b[4], b[5]]);
                    SocketAddr::new(std::net::IpAddr::V4(ip), port)
                })
                .collect::<Vec<_>>()
        });

        let token = results.get(b"token").and_then(|v| v.as_bytes()).cloned();

        let response = if peers.is_some() || token.is_some() {
            DhtResponse::GetPeers {
                id: sender_id,
                token: token.unwrap_or_default(),
                peers,
                nodes,
            }
        } else if let Some(nodes) = nodes {
            DhtResponse::FindNode {
                id: sender_id,
                nodes,
            }
        } else {
            DhtResponse::Ping { id: sender_id }
        };

        Ok(Self {
            transaction_id,
            sender_id: Some(sender_id),
            query: None,
            response: Some(response),
        })
    }

    fn parse_error(transaction_id: TransactionId, value: &Value) -> Result<Self, DhtError> {
        let error = value
            .get(b"e")
            .and_then(|v| v.as_list())
            .ok_or_else(|| DhtError::InvalidMessage("missing error list".into()))?;

        let code = error.first().and_then(|v| v.as_integer()).unwrap_or(0);

        let message = error
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();

        Ok(Self {
            transaction_id,
            sender_id: None,
            query: None,
            response: Some(DhtResponse::Error { code, message }),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dict: Vec<(Bytes, Value)> = vec![(
            Bytes::from_static(b"t"),
            Value::Bytes(self.transaction_id.clone()),
        )];

        if let Some(query) = &self.query {
            dict.push((Bytes::from_static(b"y"), Value::string("q")));
            dict.push((Bytes::from_static(b"q"), Value::string(query.name())));

            let mut args: Vec<(Bytes, Value)> = Vec::new();

            if let Some(id) = &self.sender_id {
                args.push((
                    Bytes::from_static(b"id"),
                    Value::Bytes(Bytes::copy_from_slice(id.as_bytes())),
                ));
            }

            match query {
                DhtQuery::Ping => {}
                DhtQuery::FindNode { target } => {
                    args.push((
                        Bytes::from_static(b"target"),
                        Value::Bytes(Bytes::copy_from_slice(target.as_bytes())),
                    ));
                }
                DhtQuery::GetPeers { info_hash } => {
                    args.push((
                        Bytes::from_static(b"info_hash"),
                        Value::Bytes(Bytes::copy_from_slice(info_hash)),
                    ));
                }
                DhtQuery::AnnouncePeer {
                    info_hash,
                    port,
                    token,
                    implied_port,
                } => {
                    args.push((
                        Bytes::from_static(b"info_hash"),
                        Value::Bytes(Bytes::copy_from_slice(info_hash)),
                    ));
                    args.push((Bytes::from_static(b"port"), Value::Integer(*port as i64)));
                    args.push((Bytes::from_static(b"token"), Value::Bytes(token.clone())));
                    if *implied_port {
                        args.push((Bytes::from_static(b"implied_port"), Value::Integer(1)));
                    }
                }
            }

            dict.push((Bytes::from_static(b"a"), Value::Dict(args)));
        }

        if let Some(response) = &self.response {
            match response {
                DhtResponse::Error { code, message } => {
                    dict.push((Bytes::from_static(b"y"), Value::string("e")));
                    dict.push((
                        Bytes::from_static(b"e"),
                        Value::List(vec![Value::Integer(*code), Value::string(message)]),
                    ));
                }
                _ => {
                    dict.push((Bytes::from_static(b"y"), Value::string("r")));
                    dict.push((
                        Bytes::from_static(b"r"),
                        Value::Dict(Self::encode_results(response)),
                    ));
                }
            }
        }

        encode(&Value::Dict(dict))
    }

    fn encode_results(response: &DhtResponse) -> Vec<(Bytes, Value)> {
        let id_entry = |id: &NodeId| {
            (
                Bytes::from_static(b"id"),
                Value::Bytes(Bytes::copy_from_slice(id.as_bytes())),
            )
        };

        let compact_nodes = |nodes: &[Node]| {
            let compact: Vec<u8> = nodes
                .iter()
                .filter_map(|n| n.to_compact())
                .flatten()
                .collect();
            Value::Bytes(Bytes::from(compact))
        };

        match response {
            DhtResponse::Ping { id } | DhtResponse::AnnouncePeer { id } => vec![id_entry(id)],
            DhtResponse::FindNode { id, nodes } => {
                vec![id_entry(id), (Bytes::from_static(b"nodes"), compact_nodes(nodes))]
            }
            DhtResponse::GetPeers {
                id,
                token,
                peers,
                nodes,
            } => {
                let mut results = vec![
                    id_entry(id),
                    (Bytes::from_static(b"token"), Value::Bytes(token.clone())),
                ];

                if let Some(peers) = peers {
                    let values: Vec<Value> = peers
                        .iter()
                        .filter_map(|addr| {
                            if let SocketAddr::V4(v4) = addr {
                                let mut data = [0u8; 6];
                                data[..4].copy_from_slice(&v4.ip().octets());
                                data[4..6].copy_from_slice(&v4.port().to_be_bytes());
                                Some(Value::Bytes(Bytes::copy_from_slice(&data)))
                            } else {
                                None
                            }
                        })
                        .collect();
                    results.push((Bytes::from_static(b"values"), Value::List(values)));
                }

                if let Some(nodes) = nodes {
                    results.push((Bytes::from_static(b"nodes"), compact_nodes(nodes)));
                }

                results
            }
            DhtResponse::Error { .. } => unreachable!("errors use the e envelope"),
        }
    }
}
