//! Organism assembly: one explicit context object per organism.
//!
//! There is no ambient global state; registry, thread registry, and pump are
//! owned here, so several independent organisms can coexist in one process
//! (which is also how the integration tests run).

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use polyp_core::config::OrganismConfig;
use polyp_core::error::RegisterError;

use crate::pump::{Delivery, EgressFrame, InFlight, IngressOrigin, Outbox, PumpWorker, Sender, WitnessFn};
use crate::registry::{Listener, ListenerSpec, Registry};
use crate::threads::ThreadRegistry;

/// Lifecycle errors for the organism itself.
#[derive(Debug, Error)]
pub enum OrganismError {
    #[error("Pump already started")]
    AlreadyStarted,
    #[error("Ingress is closed")]
    IngressClosed,
}

/// A running (or about-to-run) message organism.
pub struct Organism {
    config: Arc<OrganismConfig>,
    registry: Arc<Registry>,
    threads: Arc<ThreadRegistry>,
    ingress_tx: mpsc::UnboundedSender<InFlight>,
    ingress_rx: Option<mpsc::UnboundedReceiver<InFlight>>,
    outbox: Option<Outbox>,
    outbox_tx: mpsc::UnboundedSender<EgressFrame>,
    witness: Option<Arc<WitnessFn>>,
    shutdown: CancellationToken,
    pump_handle: Option<JoinHandle<()>>,
}

impl Organism {
    pub fn new(config: OrganismConfig) -> Self {
        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        let (outbox, outbox_tx) = Outbox::new();
        Self {
            config: Arc::new(config),
            registry: Arc::new(Registry::new()),
            threads: Arc::new(ThreadRegistry::new()),
            ingress_tx,
            ingress_rx: Some(ingress_rx),
            outbox: Some(outbox),
            outbox_tx,
            witness: None,
            shutdown: CancellationToken::new(),
            pump_handle: None,
        }
    }

    pub fn config(&self) -> &OrganismConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn threads(&self) -> &Arc<ThreadRegistry> {
        &self.threads
    }

    /// Register a listener with all derived artifacts materialized.
    pub async fn register(&self, spec: ListenerSpec) -> Result<Arc<Listener>, RegisterError> {
        let listener = self.registry.register(spec).await?;
        info!(listener = %listener.name, root_tag = %listener.root_tag, "registered listener");
        Ok(listener)
    }

    /// Unregister a listener; no new routing resolves to it afterwards.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name).await;
        if removed {
            info!(listener = %name, "unregistered listener");
        }
        removed
    }

    /// Install an observer for every canonicalized envelope. Must be set
    /// before [`Organism::start`].
    pub fn set_witness(&mut self, witness: Arc<WitnessFn>) {
        self.witness = Some(witness);
    }

    /// Take the egress outbox. The transport reads frames addressed to
    /// external clients from here.
    pub fn take_outbox(&mut self) -> Option<Outbox> {
        self.outbox.take()
    }

    /// Start the pump loop.
    pub fn start(&mut self) -> Result<(), OrganismError> {
        let rx = self
            .ingress_rx
            .take()
            .ok_or(OrganismError::AlreadyStarted)?;
        let worker = PumpWorker {
            config: self.config.clone(),
            registry: self.registry.clone(),
            threads: self.threads.clone(),
            ingress_tx: self.ingress_tx.clone(),
            outbox_tx: self.outbox_tx.clone(),
            handler_permits: Arc::new(Semaphore::new(self.config.max_concurrent_handlers)),
            witness: self.witness.clone(),
            shutdown: self.shutdown.clone(),
        };
        self.pump_handle = Some(tokio::spawn(worker.run(rx)));
        Ok(())
    }

    /// Ingest raw bytes from the transport.
    pub fn inject(&self, raw: Vec<u8>, origin: IngressOrigin) -> Result<(), OrganismError> {
        let in_flight = InFlight {
            raw,
            sender: Sender::External {
                client: origin.client_id,
                auth: origin.auth,
            },
            thread: None,
            delivery: Delivery::Resolve,
        };
        self.ingress_tx
            .send(in_flight)
            .map_err(|_| OrganismError::IngressClosed)
    }

    /// Stop intake, drain the ready queue, and wait for the pump to exit.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.pump_handle.take() {
            let _ = handle.await;
        }
    }
}
