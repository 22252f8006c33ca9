//! Lifecycle wiring: owns the capture-to-buffer loop, the periodic
//! dispatcher, the alert poller, and the shutdown sequence.

mod dispatcher;

pub use dispatcher::Dispatcher;

use crate::alerts::{AlertMapper, Poller};
use crate::client::ApiClient;
use crate::config::Config;
use crate::error::Result;
use crate::events::JsonFileWriter;
use crate::groups::Groups;
use crate::packet::{PacketBuffer, SidecarWriter, Sniffer};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Executor {
    config: Config,
    groups: Arc<Groups>,
    buffer: Arc<Mutex<PacketBuffer>>,
    sidecar: Option<Arc<Mutex<SidecarWriter>>>,
    dispatcher: Arc<Dispatcher>,
    poller: Arc<Poller>,
    shutdown: broadcast::Sender<()>,
}

impl Executor {
    /// Build the pipeline: whitelist groups, event writer, poller with
    /// its persisted cursor, buffer and (when configured) the sidecar.
    /// Configuration problems surface here, before any worker starts.
    pub fn new(client: Arc<dyn ApiClient>, config: Config) -> Result<Self> {
        let groups = Arc::new(Groups::from_config(&config.whitelist)?);

        let events_writer = JsonFileWriter::open(&config.events.file)?;
        let mut poller = Poller::new(
            Arc::clone(&client),
            AlertMapper::new(Arc::clone(&groups)),
            Box::new(events_writer),
        );
        if let Some(path) = &config.data.file {
            poller.set_follow_file(path.clone())?;
        }

        let buffer = Arc::new(Mutex::new(PacketBuffer::new()));
        let sidecar = match &config.queries.failed.file {
            Some(path) => Some(Arc::new(Mutex::new(SidecarWriter::open(path)?))),
            None => None,
        };
        let dispatcher = Arc::new(Dispatcher::new(
            client,
            Arc::clone(&buffer),
            sidecar.clone(),
        ));

        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            config,
            groups,
            buffer,
            sidecar,
            dispatcher,
            poller: Arc::new(poller),
            shutdown,
        })
    }

    /// Daemon mode: live capture, periodic submission, alert polling.
    pub async fn start(&self) -> Result<()> {
        let network = &self.config.network;
        info!(
            "creating sniffer for {} interface, port {}, protocols {:?}",
            network.interface, network.port, network.protocols
        );
        let sniffer = Sniffer::live(
            &network.interface,
            &network.protocols,
            network.port,
            Arc::clone(&self.groups),
        )?;

        self.spawn_signal_handler()?;
        self.spawn_poller();
        self.spawn_dispatcher();
        self.run(sniffer, true).await;
        Ok(())
    }

    /// Capture without an API connection: queries accumulate in the
    /// buffer and are periodically written to the sidecar file.
    pub async fn start_offline(&self) -> Result<()> {
        let network = &self.config.network;
        info!(
            "creating offline sniffer for {} interface, port {}, protocols {:?}",
            network.interface, network.port, network.protocols
        );
        let sniffer = Sniffer::live(
            &network.interface,
            &network.protocols,
            network.port,
            Arc::clone(&self.groups),
        )?;

        self.spawn_signal_handler()?;
        self.spawn_sidecar_writer();
        self.run(sniffer, false).await;
        Ok(())
    }

    /// Replay a PCAP file and submit every query it holds.
    pub async fn send(&self, file: &Path) -> Result<()> {
        info!("creating sniffer for {} file", file.display());
        let network = &self.config.network;
        let sniffer = Sniffer::offline(
            file,
            &network.protocols,
            network.port,
            Arc::clone(&self.groups),
        )?;
        self.run(sniffer, true).await;
        Ok(())
    }

    // Consume the sniffer until EOF or shutdown, then drain once more.
    // `submit` selects where a threshold crossing sends the buffer: the
    // API or the sidecar file.
    async fn run(&self, mut sniffer: Sniffer, submit: bool) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                query = sniffer.next() => {
                    let Some(query) = query else { break };
                    let len = self.buffer.lock().write([query]);
                    if len == self.config.queries.buffer_size {
                        // flush early, without blocking capture
                        if submit {
                            self.dispatcher.spawn_flush();
                        } else {
                            self.spawn_spill();
                        }
                    }
                }
            }
        }

        if submit {
            self.dispatcher.flush().await;
        }
        self.spill_remaining();
    }

    fn spawn_signal_handler(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("shutdown signal received, draining");
            let _ = shutdown.send(());
            // a second signal inside the grace period forces exit
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("second signal received, exiting immediately");
                    std::process::exit(1);
                }
                _ = sigterm.recv() => {
                    warn!("second signal received, exiting immediately");
                    std::process::exit(1);
                }
                _ = tokio::time::sleep(SHUTDOWN_GRACE) => std::process::exit(0),
            }
        });
        Ok(())
    }

    fn spawn_poller(&self) {
        let poller = Arc::clone(&self.poller);
        let interval = self.config.poll_interval();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move { poller.run(interval, shutdown).await });
    }

    fn spawn_dispatcher(&self) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => dispatcher.flush().await,
                }
            }
        });
    }

    // Offline counterpart of the dispatcher: periodically move the
    // buffer to the sidecar, or discard with a note when none is set.
    fn spawn_sidecar_writer(&self) {
        let buffer = Arc::clone(&self.buffer);
        let sidecar = self.sidecar.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => spill(&buffer, sidecar.as_deref()),
                }
            }
        });
    }

    fn spawn_spill(&self) {
        let buffer = Arc::clone(&self.buffer);
        let sidecar = self.sidecar.clone();
        tokio::spawn(async move { spill(&buffer, sidecar.as_deref()) });
    }

    // Best-effort spill of whatever the final flush left behind.
    fn spill_remaining(&self) {
        if self.buffer.lock().is_empty() {
            return;
        }
        spill(&self.buffer, self.sidecar.as_deref());
    }
}

fn spill(buffer: &Mutex<PacketBuffer>, sidecar: Option<&Mutex<SidecarWriter>>) {
    let queries = buffer.lock().drain();
    if queries.is_empty() {
        return;
    }
    let Some(sidecar) = sidecar else {
        info!(
            "no failed queries file set, discarding {} dns queries",
            queries.len()
        );
        return;
    };
    match sidecar.lock().write(&queries) {
        Ok(()) => info!("{} dns queries written to pcap file", queries.len()),
        Err(err) => {
            warn!("pcap write failed: {err}");
            buffer.lock().put_back(queries);
        }
    }
}
