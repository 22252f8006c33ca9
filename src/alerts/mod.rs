//! Alert records written to the event log, and the mapper that flattens
//! API responses into them.

pub mod poller;

pub use poller::Poller;

use crate::client::AlertsResponse;
use crate::groups::Groups;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

/// One poll's worth of mapped events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Alert {
    pub follow: String,
    pub more: bool,
    pub events: Vec<Event>,
}

/// A single alert event, a union of the dns and ip shapes tagged by
/// `eventType`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<EventGroup>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub threats: BTreeMap<String, Threat>,

    // common fields
    #[serde(rename = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "srcIp", skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<IpAddr>,

    // ip event fields
    #[serde(rename = "srcPort", skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(rename = "destIp", skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<IpAddr>,
    #[serde(rename = "destPort", skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    #[serde(rename = "proto", skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(rename = "bytesIn", skip_serializing_if = "Option::is_none")]
    pub bytes_in: Option<u64>,
    #[serde(rename = "bytesOut", skip_serializing_if = "Option::is_none")]
    pub bytes_out: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ja3: Option<String>,

    // dns event fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(rename = "recordType", skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
}

impl Event {
    /// Highest-severity threat on this event. Ties keep the first
    /// threat id in order.
    pub fn top_threat(&self) -> Option<(&str, &Threat)> {
        let mut top: Option<(&str, &Threat)> = None;
        for (id, threat) in &self.threats {
            if top.is_none_or(|(_, best)| threat.severity > best.severity) {
                top = Some((id, threat));
            }
        }
        top
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Threat {
    pub severity: u32,
    #[serde(rename = "desc")]
    pub description: String,
    pub policy: bool,
}

/// Whitelist group an event's source belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventGroup {
    pub label: String,
    #[serde(rename = "desc")]
    pub description: String,
}

/// Flattens API alert responses into event-log records, enriching each
/// event with the whitelist groups of its source address.
pub struct AlertMapper {
    groups: Arc<Groups>,
}

impl AlertMapper {
    pub fn new(groups: Arc<Groups>) -> Self {
        Self { groups }
    }

    pub fn map(&self, response: &AlertsResponse) -> Alert {
        let mut alert = Alert {
            follow: response.follow.clone(),
            more: response.more,
            events: Vec::with_capacity(response.alerts.len()),
        };

        for raw in &response.alerts {
            let mut event = Event {
                kind: "alert".to_string(),
                event_type: raw.event_type.clone(),
                flags: raw.wisdom.flags.clone(),
                ..Default::default()
            };

            for id in &raw.threats {
                if let Some(info) = response.threats.get(id) {
                    event.threats.insert(
                        id.clone(),
                        Threat {
                            severity: info.severity,
                            description: info.title.clone(),
                            policy: info.policy,
                        },
                    );
                }
            }

            match raw.event_type.as_str() {
                "dns" => {
                    if let Some(dns) = &raw.dns {
                        event.timestamp = dns.timestamp;
                        event.src_ip = dns.src_ip;
                        event.query = Some(dns.query.clone());
                        event.record_type = Some(dns.record_type.clone());
                    }
                }
                "ip" => {
                    if let Some(ip) = &raw.ip {
                        event.timestamp = ip.timestamp;
                        event.src_ip = ip.src_ip;
                        event.src_port = Some(ip.src_port);
                        event.dst_ip = ip.dst_ip;
                        event.dst_port = Some(ip.dst_port);
                        event.protocol = Some(ip.protocol.clone());
                        event.bytes_in = Some(ip.bytes_in);
                        event.bytes_out = Some(ip.bytes_out);
                        event.ja3 = Some(ip.ja3.clone());
                    }
                }
                _ => {}
            }

            if let Some(src_ip) = event.src_ip {
                for group in self.groups.find_by_src_ip(src_ip) {
                    event.groups.push(EventGroup {
                        label: group.name.clone(),
                        description: group.label.clone(),
                    });
                }
            }

            alert.events.push(event);
        }

        alert
    }
}
