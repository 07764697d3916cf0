//! Wiring and lifecycle of the running lap counter.
//!
//! [`RelayService::start`] creates the channels, binds the gateway and
//! spawns every task. [`RelayService::stop`] signals shutdown, waits for the
//! processor and the hub, and only then closes the journal, so the final
//! flush sees every accepted lap.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use relay_core::config::AppConfig;
use relay_core::error::RelayError;
use relay_core::registry::Registry;
use relay_core::types::{Standings, TagId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::gateway::{GatewayContext, GatewayServer};
use crate::hub;
use crate::processor::{LapProcessor, ProcessorExit};
use crate::ticker::HourTicker;

pub struct RelayService<R: Registry + 'static> {
    name: String,
    local_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<bool>>,
    intake: mpsc::Sender<TagId>,
    hour: watch::Receiver<Option<u8>>,
    standings: watch::Receiver<Arc<Standings>>,
    processor: JoinHandle<ProcessorExit<R>>,
    hub: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R: Registry + 'static> RelayService<R> {
    /// Start every task around `processor`.
    ///
    /// Pending journal records are flushed first, so admin changes made
    /// before a failed start are not lost with the processor.
    pub async fn start(config: &AppConfig, mut processor: LapProcessor<R>) -> Result<Self> {
        let name = config.module_name();
        processor.flush_journal()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let (hub_task, hub) = hub::channel(config.hub.effective_queue_capacity(), config.hub.overflow);
        let (intake_tx, intake_rx) = mpsc::channel(config.effective_intake_capacity());
        let (hour_tx, hour_rx) = watch::channel(None);
        let standings = processor.standings();

        let gateway = GatewayServer::bind(
            config.effective_listen_addr()?,
            GatewayContext {
                intake: intake_tx.clone(),
                hub: hub.clone(),
                standings: standings.clone(),
                shutdown: shutdown_rx.clone(),
            },
        )
        .await?;
        let local_addr = gateway.local_addr()?;

        let hub_handle = tokio::spawn(hub_task.run(shutdown_rx.clone()));

        let fatal_tx = Arc::clone(&shutdown_tx);
        let processor_shutdown = shutdown_rx.clone();
        let processor_hour = hour_rx.clone();
        let processor_handle = tokio::spawn(async move {
            let exit = processor.run(intake_rx, processor_hour, hub, processor_shutdown).await;
            if exit.fatal.is_some() {
                fatal_tx.send_replace(true);
            }
            exit
        });

        let ticker = HourTicker::from_config(&config.hours);
        let tasks = vec![
            tokio::spawn(ticker.run(hour_tx, shutdown_rx.clone())),
            tokio::spawn(gateway.run()),
        ];

        info!("[{name}] started on ws://{local_addr} (laps, notify, standings)");
        Ok(Self {
            name,
            local_addr,
            shutdown_tx,
            intake: intake_tx,
            hour: hour_rx,
            standings,
            processor: processor_handle,
            hub: hub_handle,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender into the intake queue, for in-process readers.
    pub fn intake(&self) -> mpsc::Sender<TagId> {
        self.intake.clone()
    }

    pub fn hour(&self) -> watch::Receiver<Option<u8>> {
        self.hour.clone()
    }

    pub fn standings(&self) -> watch::Receiver<Arc<Standings>> {
        self.standings.clone()
    }

    /// Resolves once shutdown has been requested, including by the
    /// processor stopping on a fatal error.
    pub async fn wait_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Stop every task, close the journal and hand back the registry.
    pub async fn stop(self) -> Result<R> {
        info!("[{}] stopping", self.name);
        self.shutdown_tx.send_replace(true);

        let exit = self
            .processor
            .await
            .map_err(|e| RelayError::Task(format!("processor: {e}")))?;
        if let Err(e) = self.hub.await {
            warn!("[{}] hub task ended abnormally: {e}", self.name);
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("[{}] task ended abnormally: {e}", self.name);
            }
        }

        exit.journal.close()?;
        if let Some(fatal) = exit.fatal {
            error!("[{}] stopped on fatal error: {fatal}", self.name);
            return Err(fatal.into());
        }
        info!("[{}] stopped", self.name);
        Ok(exit.registry)
    }
}
