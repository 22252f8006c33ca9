//! Live and offline capture, exposed as a lazy stream of decoded
//! queries. A dedicated thread owns the blocking capture handle and
//! feeds an unbounded channel; the executor drains it.

use super::{CaptureInfo, Query};
use crate::error::Result;
use crate::groups::Groups;
use pcap::{Activated, Capture};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const SNAPLEN: i32 = 65536;
const READ_TIMEOUT_MS: i32 = 500;

/// Single-consumer stream of decoded, whitelist-filtered queries in
/// capture order. Ends at EOF for offline captures and when the handle
/// is dropped for live ones.
pub struct Sniffer {
    rx: mpsc::UnboundedReceiver<Query>,
}

impl Sniffer {
    /// Open a live capture on an interface with a BPF filter synthesized
    /// from the configured protocols and port.
    pub fn live(
        interface: &str,
        protocols: &[String],
        port: u16,
        groups: Arc<Groups>,
    ) -> Result<Self> {
        let mut capture = Capture::from_device(interface)?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()?;
        capture.filter(&bpf_filter(protocols, port), true)?;
        Ok(Self::spawn(capture, groups))
    }

    /// Open a PCAP file as a finite source.
    pub fn offline<P: AsRef<Path>>(
        path: P,
        protocols: &[String],
        port: u16,
        groups: Arc<Groups>,
    ) -> Result<Self> {
        let mut capture = Capture::from_file(path)?;
        capture.filter(&bpf_filter(protocols, port), true)?;
        Ok(Self::spawn(capture, groups))
    }

    fn spawn<T: Activated + Send + 'static>(capture: Capture<T>, groups: Arc<Groups>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || capture_loop(capture, groups, tx));
        Self { rx }
    }

    /// Next decoded query, or None once the capture is exhausted.
    pub async fn next(&mut self) -> Option<Query> {
        self.rx.recv().await
    }
}

fn capture_loop<T: Activated>(
    mut capture: Capture<T>,
    groups: Arc<Groups>,
    tx: mpsc::UnboundedSender<Query>,
) {
    loop {
        match capture.next_packet() {
            Ok(packet) => {
                let info = CaptureInfo {
                    ts_sec: packet.header.ts.tv_sec as i64,
                    ts_usec: packet.header.ts.tv_usec as i64,
                    caplen: packet.header.caplen,
                    len: packet.header.len,
                };
                let Some(query) = Query::from_frame(packet.data, info) else {
                    continue;
                };
                if groups.should_drop_query(query.source_ip, &query.fqdn) {
                    debug!("dropping whitelisted query {}", query);
                    continue;
                }
                if tx.send(query).is_err() {
                    break;
                }
            }
            // live reads time out so a dropped consumer is noticed
            Err(pcap::Error::TimeoutExpired) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(err) => {
                warn!("capture read failed: {err}");
                break;
            }
        }
    }
}

fn bpf_filter(protocols: &[String], port: u16) -> String {
    let protocols: Vec<&str> = if protocols.is_empty() {
        vec!["udp", "tcp"]
    } else {
        protocols.iter().map(String::as_str).collect()
    };
    protocols
        .iter()
        .map(|protocol| format!("{protocol} port {port}"))
        .collect::<Vec<_>>()
        .join(" or ")
}
