//! Batch submission: drain the buffer, submit, and on failure spill to
//! the PCAP sidecar or return the batch for the next flush.

use crate::client::{ApiClient, QueriesRequest};
use crate::packet::{PacketBuffer, Query, SidecarWriter};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct Dispatcher {
    client: Arc<dyn ApiClient>,
    buffer: Arc<Mutex<PacketBuffer>>,
    sidecar: Option<Arc<Mutex<SidecarWriter>>>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn ApiClient>,
        buffer: Arc<Mutex<PacketBuffer>>,
        sidecar: Option<Arc<Mutex<SidecarWriter>>>,
    ) -> Self {
        Self {
            client,
            buffer,
            sidecar,
        }
    }

    /// Take a snapshot of the buffer and submit it. The batch ends up in
    /// exactly one place: accepted by the API, appended to the sidecar,
    /// or back at the front of the buffer.
    pub async fn flush(&self) {
        let queries = self.buffer.lock().drain();
        if queries.is_empty() {
            return;
        }

        info!("sending {} dns queries for analysis", queries.len());
        match self.client.queries(&to_request(&queries)).await {
            Ok(response) => {
                if response.received == response.accepted {
                    info!("{} dns queries were accepted", response.accepted);
                } else {
                    info!(
                        "{} of {} dns queries were accepted, rejected: {:?}",
                        response.accepted, response.received, response.rejected
                    );
                }
            }
            Err(err) => {
                error!("query submission failed: {err}");
                if let Some(sidecar) = &self.sidecar {
                    match sidecar.lock().write(&queries) {
                        Ok(()) => {
                            info!("{} dns queries written to pcap file", queries.len());
                            return;
                        }
                        Err(err) => warn!("pcap spill failed: {err}"),
                    }
                }
                self.buffer.lock().put_back(queries);
            }
        }
    }

    /// Out-of-band flush that does not block the caller.
    pub fn spawn_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.flush().await })
    }
}

fn to_request(queries: &[Query]) -> QueriesRequest {
    let mut request = QueriesRequest::new();
    for query in queries {
        request.add(query.to_request_entry());
    }
    request
}
