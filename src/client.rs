//! The narrow remote-service capability the sensor consumes: batch
//! query submission and cursor-based alert retrieval.

use crate::error::{Result, SensorError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-API-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote analysis service operations used by the pipeline.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Submit a batch of observed DNS queries for analysis.
    async fn queries(&self, request: &QueriesRequest) -> Result<QueriesResponse>;

    /// Fetch alerts after the given follow cursor; empty means start
    /// from the beginning.
    async fn alerts(&self, follow: &str) -> Result<AlertsResponse>;
}

/// Batch of `[timestamp, source, type, fqdn]` entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueriesRequest {
    pub data: Vec<[String; 4]>,
}

impl QueriesRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: [String; 4]) {
        self.data.push(entry);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueriesResponse {
    pub received: u64,
    pub accepted: u64,
    pub rejected: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertsResponse {
    pub follow: String,
    pub more: bool,
    pub alerts: Vec<RawAlert>,
    pub threats: HashMap<String, ThreatInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAlert {
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub wisdom: Wisdom,
    pub threats: Vec<String>,
    #[serde(rename = "dnsEvent")]
    pub dns: Option<DnsAlertEvent>,
    #[serde(rename = "ipEvent")]
    pub ip: Option<IpAlertEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Wisdom {
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DnsAlertEvent {
    #[serde(rename = "ts")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "srcIp")]
    pub src_ip: Option<IpAddr>,
    pub query: String,
    #[serde(rename = "recordType")]
    pub record_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IpAlertEvent {
    #[serde(rename = "ts")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "srcIp")]
    pub src_ip: Option<IpAddr>,
    #[serde(rename = "srcPort")]
    pub src_port: u16,
    #[serde(rename = "destIp")]
    pub dst_ip: Option<IpAddr>,
    #[serde(rename = "destPort")]
    pub dst_port: u16,
    #[serde(rename = "proto")]
    pub protocol: String,
    #[serde(rename = "bytesIn")]
    pub bytes_in: u64,
    #[serde(rename = "bytesOut")]
    pub bytes_out: u64,
    pub ja3: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ThreatInfo {
    pub severity: u32,
    pub title: String,
    pub policy: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

/// HTTPS implementation of the service capability. The API key is sent
/// as a header with every request.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
}

impl HttpApiClient {
    pub fn new(host: &str, api_version: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base: format!("{}/{}", host.trim_end_matches('/'), api_version),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base, endpoint)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        match status.as_u16() {
            401 | 403 => Err(SensorError::Auth),
            429 => Err(SensorError::RateLimited),
            code => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiMessage>(&body)
                    .map(|m| m.message)
                    .unwrap_or(body);
                Err(SensorError::Api {
                    status: code,
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn queries(&self, request: &QueriesRequest) -> Result<QueriesResponse> {
        let response = self
            .http
            .post(self.url("queries"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn alerts(&self, follow: &str) -> Result<AlertsResponse> {
        let mut request = self
            .http
            .get(self.url("alerts"))
            .header(API_KEY_HEADER, &self.api_key);
        if !follow.is_empty() {
            request = request.query(&[("follow", follow)]);
        }
        Self::decode(request.send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_request_serializes_as_a_data_array() {
        let mut request = QueriesRequest::new();
        request.add([
            "2020-09-13T12:26:40Z".to_string(),
            "10.0.0.5".to_string(),
            "A".to_string(),
            "example.com".to_string(),
        ]);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"data":[["2020-09-13T12:26:40Z","10.0.0.5","A","example.com"]]}"#
        );
    }

    #[test]
    fn alerts_response_tolerates_missing_fields() {
        let response: AlertsResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response.follow, "");
        assert!(!response.more);
        assert!(response.alerts.is_empty());
    }

    #[test]
    fn alerts_response_decodes_nested_events() {
        let raw = r#"{
            "follow": "c3",
            "more": true,
            "alerts": [
                {
                    "eventType": "dns",
                    "wisdom": {"flags": ["c2", "young_domain"]},
                    "threats": ["t1"],
                    "dnsEvent": {
                        "ts": "2020-09-13T12:26:40Z",
                        "srcIp": "10.0.0.7",
                        "query": "evil.example",
                        "recordType": "TXT"
                    }
                },
                {
                    "eventType": "ip",
                    "threats": [],
                    "ipEvent": {
                        "srcIp": "10.0.0.7",
                        "srcPort": 49206,
                        "destIp": "185.174.175.14",
                        "destPort": 443,
                        "proto": "tcp",
                        "bytesIn": 128,
                        "bytesOut": 512,
                        "ja3": "4d7a28d6f2263ed61de88ca66eb011e3"
                    }
                }
            ],
            "threats": {
                "t1": {"severity": 4, "title": "C2 traffic", "policy": false}
            }
        }"#;
        let response: AlertsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.follow, "c3");
        assert!(response.more);
        assert_eq!(response.alerts.len(), 2);
        let dns = response.alerts[0].dns.as_ref().unwrap();
        assert_eq!(dns.query, "evil.example");
        assert_eq!(response.alerts[0].wisdom.flags, vec!["c2", "young_domain"]);
        let ip = response.alerts[1].ip.as_ref().unwrap();
        assert_eq!(ip.dst_port, 443);
        assert_eq!(response.threats["t1"].severity, 4);
    }
}
