//! Long-running alert retrieval: page through the API with a durable
//! follow cursor, write mapped events, and never advance the cursor on
//! failure. Re-fetching after a failed persist may duplicate events but
//! cannot skip any.

use super::AlertMapper;
use crate::client::ApiClient;
use crate::error::Result;
use crate::events::Writer;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

pub struct Poller {
    client: Arc<dyn ApiClient>,
    mapper: AlertMapper,
    writer: Mutex<Box<dyn Writer>>,
    follow_file: Option<PathBuf>,
    follow: Mutex<String>,
}

impl Poller {
    pub fn new(client: Arc<dyn ApiClient>, mapper: AlertMapper, writer: Box<dyn Writer>) -> Self {
        Self {
            client,
            mapper,
            writer: Mutex::new(writer),
            follow_file: None,
            follow: Mutex::new(String::new()),
        }
    }

    /// Persist the follow cursor at the given path, loading any cursor a
    /// previous run left behind. An absent or empty file starts from the
    /// beginning.
    pub fn set_follow_file(&mut self, path: PathBuf) -> Result<()> {
        let follow = match fs::read_to_string(&path) {
            Ok(raw) => raw.trim().to_string(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        if !follow.is_empty() {
            info!("resuming alerts from follow cursor {follow}");
        }
        *self.follow.lock() = follow;
        self.follow_file = Some(path);
        Ok(())
    }

    /// The current in-memory cursor.
    pub fn follow(&self) -> String {
        self.follow.lock().clone()
    }

    /// One request/map/write/persist round. Returns the response's
    /// `more` flag. The cursor only advances after the batch has been
    /// fully handled.
    pub async fn poll_once(&self) -> Result<bool> {
        let follow = self.follow();
        let response = self.client.alerts(&follow).await?;
        let alert = self.mapper.map(&response);
        if !alert.events.is_empty() {
            info!("writing {} alert events", alert.events.len());
            self.writer.lock().write(&alert)?;
        }
        self.persist_follow(&response.follow)?;
        *self.follow.lock() = response.follow;
        Ok(response.more)
    }

    // Sibling temp file plus rename, so readers never see a torn cursor.
    fn persist_follow(&self, follow: &str) -> Result<()> {
        let Some(path) = &self.follow_file else {
            debug!("no follow data file set, keeping cursor in memory");
            return Ok(());
        };
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, follow)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Poll until shutdown. `more` responses chain immediately; anything
    /// else waits out the configured interval, including failures.
    pub async fn run(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        loop {
            match self.poll_once().await {
                Ok(true) => {
                    if !matches!(
                        shutdown.try_recv(),
                        Err(broadcast::error::TryRecvError::Empty)
                    ) {
                        break;
                    }
                    continue;
                }
                Ok(false) => {}
                Err(err) => error!("alert poll failed: {err}"),
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
