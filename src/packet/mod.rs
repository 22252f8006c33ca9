//! Captured-frame decoding and the in-memory query pipeline.

pub mod buffer;
pub mod dns;
pub mod sniffer;
pub mod writer;

pub use buffer::PacketBuffer;
pub use sniffer::Sniffer;
pub use writer::SidecarWriter;

use chrono::{DateTime, SecondsFormat, Utc};
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use std::fmt;
use std::net::IpAddr;

/// Capture metadata kept with every query so that failed batches can be
/// spilled back out in PCAP format with their original timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub ts_sec: i64,
    pub ts_usec: i64,
    pub caplen: u32,
    pub len: u32,
}

/// A single decoded DNS question observed on the wire.
#[derive(Debug, Clone)]
pub struct Query {
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub record_type: String,
    pub fqdn: String,
    raw: Vec<u8>,
    capture: CaptureInfo,
}

impl Query {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_ip: IpAddr,
        record_type: String,
        fqdn: String,
        raw: Vec<u8>,
        capture: CaptureInfo,
    ) -> Self {
        Self {
            timestamp,
            source_ip,
            record_type,
            fqdn,
            raw,
            capture,
        }
    }

    /// Decode a captured Ethernet frame into a query. Returns None for
    /// anything that is not an intact IPv4/IPv6 DNS question: decode
    /// failures are silent by design.
    pub fn from_frame(data: &[u8], capture: CaptureInfo) -> Option<Self> {
        let sliced = SlicedPacket::from_ethernet(data).ok()?;

        let source_ip = match &sliced.ip {
            Some(InternetSlice::Ipv4(header, _)) => IpAddr::V4(header.source_addr()),
            Some(InternetSlice::Ipv6(header, _)) => IpAddr::V6(header.source_addr()),
            None => return None,
        };

        let message = match &sliced.transport {
            Some(TransportSlice::Udp(_)) => sliced.payload,
            Some(TransportSlice::Tcp(_)) => tcp_dns_payload(sliced.payload),
            _ => return None,
        };

        let question = dns::parse_question(message)?;
        let timestamp =
            DateTime::from_timestamp(capture.ts_sec, (capture.ts_usec as u32).checked_mul(1000)?)?;

        Some(Self {
            timestamp,
            source_ip,
            record_type: question.record_type.to_string(),
            fqdn: question.fqdn,
            // own the frame; the capture handle reuses its read buffer
            raw: data.to_vec(),
            capture,
        })
    }

    /// The original frame bytes, for PCAP spill.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn capture_info(&self) -> CaptureInfo {
        self.capture
    }

    /// The `[timestamp, source, type, fqdn]` entry the API expects.
    pub fn to_request_entry(&self) -> [String; 4] {
        [
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.source_ip.to_string(),
            self.record_type.clone(),
            self.fqdn.clone(),
        ]
    }
}

// Equality ignores timestamps and raw bytes on purpose: two observations
// of the same question compare equal.
impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.source_ip == other.source_ip
            && self.record_type == other.record_type
            && self.fqdn == other.fqdn
    }
}

impl Eq for Query {}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} from {}", self.fqdn, self.record_type, self.source_ip)
    }
}

// DNS over TCP prefixes the message with its length. Strip the prefix
// when it is consistent with the segment; no stream reassembly.
fn tcp_dns_payload(payload: &[u8]) -> &[u8] {
    if payload.len() >= 2 {
        let prefixed = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        if prefixed == payload.len() - 2 {
            return &payload[2..];
        }
    }
    payload
}
