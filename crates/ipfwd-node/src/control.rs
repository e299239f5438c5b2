//! Control-plane service for the rewrite cache.
//!
//! Line-delimited JSON over TCP. Each request names an action
//! (`UpdateForward`, `QueryForward`, `DeleteForward`, `FlushForward`) and
//! gets a response carrying a status code, the echoed trace id, and any
//! faults. This is the seam a topology watcher uses to keep the cache from
//! serving forwarding actions that are no longer valid.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ipfwd_core::{InterfaceId, MacAddr};
use ipfwd_fastpath::{ForwardingAction, RewriteCache};

use crate::error::NodeError;

/// Response status codes.
pub const CODE_OK: u32 = 200;
pub const CODE_ERR: u32 = 500;

/// Fault codes carried inside an error response.
pub const FAULT_JSON_FORMAT: u32 = 1100;
pub const FAULT_NOT_SUPPORTED: u32 = 1101;
pub const FAULT_UPDATE: u32 = 1200;
pub const FAULT_QUERY: u32 = 1201;
pub const FAULT_DELETE: u32 = 1202;

const MSG_JSON_FORMAT: &str = "json format error";
const MSG_NOT_SUPPORTED: &str = "not support action error";
const MSG_UPDATE: &str = "update forward error";
const MSG_DELETE: &str = "delete forward error";

/// One control request, one JSON object per line.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    #[serde(default)]
    pub trace_id: String,
    pub action: String,
    pub ip: Option<String>,
    pub iface: Option<u32>,
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
}

/// A fault entry inside a response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlFault {
    pub code: u32,
    pub msg: String,
}

/// One resident cache entry, rendered for `QueryForward`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableEntry {
    pub ip: String,
    pub iface: u32,
    pub src_mac: String,
    pub dst_mac: String,
}

/// Control response: status code, echoed trace id, faults, and the table
/// dump for queries.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub code: u32,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub errors: Vec<ControlFault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableEntry>>,
}

impl ControlResponse {
    fn ok(trace_id: String) -> Self {
        Self {
            code: CODE_OK,
            trace_id,
            errors: Vec::new(),
            tables: None,
        }
    }

    fn fault(trace_id: String, code: u32, msg: &str) -> Self {
        Self {
            code: CODE_ERR,
            trace_id,
            errors: vec![ControlFault {
                code,
                msg: msg.to_string(),
            }],
            tables: None,
        }
    }
}

/// Process one request line against the cache.
///
/// Pure with respect to I/O, so the protocol is testable without sockets.
pub fn handle_line(cache: &RewriteCache, line: &str) -> ControlResponse {
    let req: ControlRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(err) => {
            debug!(%err, "rejecting malformed control request");
            return ControlResponse::fault(String::new(), FAULT_JSON_FORMAT, MSG_JSON_FORMAT);
        }
    };
    handle_request(cache, req)
}

fn handle_request(cache: &RewriteCache, req: ControlRequest) -> ControlResponse {
    let trace_id = req.trace_id.clone();
    match req.action.as_str() {
        "UpdateForward" => match parse_update(&req) {
            Ok((dst, action)) => {
                cache.insert(dst, action);
                info!(%dst, egress = %action.egress, "control: updated forward entry");
                ControlResponse::ok(trace_id)
            }
            Err(msg) => {
                warn!(%msg, "control: update rejected");
                ControlResponse::fault(trace_id, FAULT_UPDATE, MSG_UPDATE)
            }
        },
        "DeleteForward" => match parse_ip(req.ip.as_deref()) {
            Ok(dst) => {
                let removed = cache.invalidate(dst);
                info!(%dst, removed, "control: deleted forward entry");
                ControlResponse::ok(trace_id)
            }
            Err(msg) => {
                warn!(%msg, "control: delete rejected");
                ControlResponse::fault(trace_id, FAULT_DELETE, MSG_DELETE)
            }
        },
        "FlushForward" => {
            cache.invalidate_all();
            info!("control: flushed forward table");
            ControlResponse::ok(trace_id)
        }
        "QueryForward" => {
            let mut tables: Vec<TableEntry> = cache
                .snapshot()
                .into_iter()
                .map(|(ip, action)| TableEntry {
                    ip: ip.to_string(),
                    iface: action.egress.0,
                    src_mac: action.src_mac.to_string(),
                    dst_mac: action.dst_mac.to_string(),
                })
                .collect();
            tables.sort_by(|a, b| a.ip.cmp(&b.ip));
            let mut resp = ControlResponse::ok(trace_id);
            resp.tables = Some(tables);
            resp
        }
        _ => ControlResponse::fault(trace_id, FAULT_NOT_SUPPORTED, MSG_NOT_SUPPORTED),
    }
}

/// Validate an update request all-or-nothing: a forwarding action is only
/// ever built with both MACs and the egress interface present.
fn parse_update(req: &ControlRequest) -> Result<(std::net::Ipv4Addr, ForwardingAction), String> {
    let dst = parse_ip(req.ip.as_deref())?;
    let iface = req.iface.ok_or_else(|| "missing iface".to_string())?;
    let src_mac: MacAddr = req
        .src_mac
        .as_deref()
        .ok_or_else(|| "missing srcMac".to_string())?
        .parse()
        .map_err(|_| format!("invalid srcMac: {:?}", req.src_mac))?;
    let dst_mac: MacAddr = req
        .dst_mac
        .as_deref()
        .ok_or_else(|| "missing dstMac".to_string())?
        .parse()
        .map_err(|_| format!("invalid dstMac: {:?}", req.dst_mac))?;
    Ok((
        dst,
        ForwardingAction::new(InterfaceId(iface), src_mac, dst_mac),
    ))
}

fn parse_ip(ip: Option<&str>) -> Result<std::net::Ipv4Addr, String> {
    let ip = ip.ok_or_else(|| "missing ip".to_string())?;
    ip.parse().map_err(|_| format!("invalid ip: {ip}"))
}

/// Handle to a running control server.
pub struct ControlHandle {
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ControlHandle {
    /// The address the server is actually bound to (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the accept loop to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

/// Bind the control service and spawn its accept loop.
pub async fn serve(cache: Arc<RewriteCache>, bind: SocketAddr) -> Result<ControlHandle, NodeError> {
    let listener = TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "control service listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(accept_loop(listener, cache, stop_rx));

    Ok(ControlHandle {
        local_addr,
        stop_tx,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    cache: Arc<RewriteCache>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let stream = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "control: accepted connection");
                        stream
                    }
                    Err(err) => {
                        warn!(%err, "control: accept error");
                        continue;
                    }
                }
            }
            _ = stop_rx.changed() => {
                debug!("control: accept loop stopping");
                break;
            }
        };

        let cache = Arc::clone(&cache);
        let conn_stop = stop_rx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, cache, conn_stop).await {
                debug!(%err, "control: connection closed with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    cache: Arc<RewriteCache>,
    mut stop_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = stop_rx.changed() => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&cache, &line);
        let mut payload = serde_json::to_vec(&response).unwrap_or_else(|_| {
            // A response we built ourselves always serializes; this arm
            // exists to keep the connection task panic-free.
            br#"{"code":500,"traceId":"","errors":[]}"#.to_vec()
        });
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }
    Ok(())
}
