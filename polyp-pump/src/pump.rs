//! The central message pump: the sole trusted component.
//!
//! The pump owns the ingress queue, schedules ready messages across threads,
//! runs the per-listener pipelines, captures dispatch metadata in trusted
//! scope before invoking handlers, enforces peer constraints on handler
//! output, injects envelopes on re-entry, and coordinates with the thread
//! registry. Handlers never see any of this machinery; their whole world is
//! the typed payload and the metadata snapshot.
//!
//! Security invariants enforced here:
//! - `from` and `thread` on emitted envelopes come from dispatcher scope,
//!   never from handler output.
//! - `to` comes from the handler but is validated against the peer set
//!   captured before invocation.
//! - Every handler error, panic, and timeout is contained at the dispatch
//!   boundary and replaced by a generic `<SystemError>`.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use polyp_core::budget::TokenBudget;
use polyp_core::config::{AuthLevel, OrganismConfig, SchedulingPolicy};
use polyp_core::descriptor::{PayloadDescriptor, PayloadRecord};
use polyp_core::error::SystemErrorCode;
use polyp_core::handler::{HandlerMetadata, HandlerResponse, Payload, UsageMeter, SELF_TARGET};
use polyp_xml::core_ns::{
    huh_record, is_core_element, system_error_record, HuhText, MetaRequest, CORE_NS,
};
use polyp_xml::envelope::{Envelope, CORE_SENDER, SYSTEM_SENDER};
use polyp_xml::schema::{record_to_element, CAPABILITY_NS};

use crate::meta;
use crate::pipeline::{self, PipelineFailure, PreparedEnvelope};
use crate::registry::{Listener, Registry, RegistrySnapshot};
use crate::threads::ThreadRegistry;

/// Transport metadata attached to externally ingested bytes.
#[derive(Debug, Clone)]
pub struct IngressOrigin {
    pub client_id: String,
    pub auth: AuthLevel,
}

impl IngressOrigin {
    pub fn new(client_id: impl Into<String>, auth: AuthLevel) -> Self {
        Self {
            client_id: client_id.into(),
            auth,
        }
    }
}

/// Who put a message into ingress.
#[derive(Debug, Clone)]
pub(crate) enum Sender {
    External { client: String, auth: AuthLevel },
    Listener(String),
    Internal(&'static str),
}

impl Sender {
    fn name(&self) -> &str {
        match self {
            Sender::External { client, .. } => client,
            Sender::Listener(name) => name,
            Sender::Internal(name) => name,
        }
    }
}

/// How the payload should reach its target.
#[derive(Clone)]
pub(crate) enum Delivery {
    /// Route by root tag against the registry (ingress and forwards).
    Resolve,
    /// Chain delivery to a known listener, validated against the descriptor
    /// the pump captured when it serialized the payload.
    Direct {
        target: String,
        descriptor: Arc<PayloadDescriptor>,
    },
}

/// One message in flight between ingress and dispatch.
pub(crate) struct InFlight {
    pub(crate) raw: Vec<u8>,
    pub(crate) sender: Sender,
    pub(crate) thread: Option<Uuid>,
    pub(crate) delivery: Delivery,
}

/// A finished message addressed to an external client.
#[derive(Debug, Clone)]
pub struct EgressFrame {
    pub client: String,
    pub bytes: Vec<u8>,
}

/// Receiving end of the egress outbox, held by the transport.
pub struct Outbox {
    rx: mpsc::UnboundedReceiver<EgressFrame>,
}

impl Outbox {
    pub(crate) fn new() -> (Self, mpsc::UnboundedSender<EgressFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }

    /// Receive the next frame, waiting until one is available.
    pub async fn recv(&mut self) -> Option<EgressFrame> {
        self.rx.recv().await
    }

    /// Drain all currently available frames without blocking.
    pub fn try_drain(&mut self) -> Vec<EgressFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Observer invoked with every canonicalized envelope before dispatch.
pub type WitnessFn = dyn Fn(&[u8]) + Send + Sync;

/// Ready-queue scheduler keyed by root thread.
pub(crate) struct Scheduler {
    queues: IndexMap<Uuid, VecDeque<InFlight>>,
    cursor: usize,
    consecutive: u32,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            queues: IndexMap::new(),
            cursor: 0,
            consecutive: 0,
        }
    }

    pub(crate) fn push(&mut self, key: Uuid, msg: InFlight) {
        self.queues.entry(key).or_default().push_back(msg);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub(crate) fn next(&mut self, policy: SchedulingPolicy, window: u32) -> Option<InFlight> {
        if self.queues.is_empty() {
            return None;
        }
        if self.cursor >= self.queues.len() {
            self.cursor = 0;
            self.consecutive = 0;
        }
        if policy == SchedulingPolicy::BreadthFirst
            && self.consecutive >= window.max(1)
            && self.queues.len() > 1
        {
            self.cursor = (self.cursor + 1) % self.queues.len();
            self.consecutive = 0;
        }

        let key = *self.queues.get_index(self.cursor)?.0;
        let queue = self.queues.get_mut(&key)?;
        let msg = queue.pop_front()?;
        self.consecutive += 1;
        if queue.is_empty() {
            self.queues.shift_remove(&key);
            if self.cursor >= self.queues.len() {
                self.cursor = 0;
            }
            self.consecutive = 0;
        }
        Some(msg)
    }
}

/// The pump worker: cheap to clone, shared by every dispatch task.
#[derive(Clone)]
pub(crate) struct PumpWorker {
    pub(crate) config: Arc<OrganismConfig>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) threads: Arc<ThreadRegistry>,
    pub(crate) ingress_tx: mpsc::UnboundedSender<InFlight>,
    pub(crate) outbox_tx: mpsc::UnboundedSender<EgressFrame>,
    pub(crate) handler_permits: Arc<Semaphore>,
    pub(crate) witness: Option<Arc<WitnessFn>>,
    pub(crate) shutdown: CancellationToken,
}

impl PumpWorker {
    /// Main pump loop: drain ingress into the scheduler, pick per policy,
    /// spawn dispatch tasks. On shutdown the ready queue is drained but no
    /// new intake is awaited.
    pub(crate) async fn run(self, mut rx: mpsc::UnboundedReceiver<InFlight>) {
        let mut scheduler = Scheduler::new();
        loop {
            while let Ok(msg) = rx.try_recv() {
                let key = self.sched_key(&msg);
                scheduler.push(key, msg);
            }
            match scheduler.next(self.config.thread_scheduling, self.config.fairness_window) {
                Some(msg) => {
                    let worker = self.clone();
                    tokio::spawn(async move { worker.process(msg).await });
                    tokio::task::yield_now().await;
                }
                None => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        maybe = rx.recv() => {
                            match maybe {
                                Some(msg) => {
                                    let key = self.sched_key(&msg);
                                    scheduler.push(key, msg);
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
        }
    }

    fn sched_key(&self, msg: &InFlight) -> Uuid {
        msg.thread
            .and_then(|t| self.threads.lookup(t))
            .map(|info| info.root)
            .unwrap_or_else(Uuid::nil)
    }

    async fn process(&self, msg: InFlight) {
        let prepared = match pipeline::prepare(&msg.raw) {
            Ok(prepared) => prepared,
            Err(failure) => {
                self.reject(&msg, failure).await;
                return;
            }
        };
        if let Some(witness) = &self.witness {
            witness(&prepared.canonical);
        }
        if !prepared.repairs.is_empty() {
            debug!(from = %prepared.envelope.from, repairs = ?prepared.repairs, "repaired envelope");
        }

        let thread = msg.thread.or(prepared.envelope.thread);
        let snapshot = self.registry.snapshot().await;

        match msg.delivery.clone() {
            Delivery::Direct { target, descriptor } => {
                self.deliver_direct(&snapshot, &msg, thread, &prepared, target, descriptor)
                    .await;
            }
            Delivery::Resolve => {
                if is_core_element(&prepared.envelope.payload) {
                    self.handle_meta(&snapshot, &msg, thread, &prepared).await;
                } else {
                    self.resolve_and_dispatch(&snapshot, &msg, thread, &prepared)
                        .await;
                }
            }
        }
    }

    /// Route by root tag, run the per-target pipelines, dispatch.
    async fn resolve_and_dispatch(
        &self,
        snapshot: &Arc<RegistrySnapshot>,
        msg: &InFlight,
        thread: Option<Uuid>,
        prepared: &PreparedEnvelope,
    ) {
        let payload = &prepared.envelope.payload;
        let root_tag = payload.name.clone();
        let candidates = snapshot.lookup_by_root(&root_tag);
        let targets: Vec<Arc<Listener>> = match &prepared.envelope.to {
            Some(to) => candidates.iter().filter(|l| &l.name == to).cloned().collect(),
            None => candidates.to_vec(),
        };

        if targets.is_empty() {
            debug!(%root_tag, "no listener for root tag");
            self.emit_huh(
                snapshot,
                HuhText::InvalidPayload,
                &msg.raw,
                Some(prepared.envelope.from.clone()),
                &msg.sender,
                thread,
            );
            return;
        }

        // Broadcast fan-out: every target gets its own pipeline and its own
        // dispatch task, initiated before any handler completes.
        for listener in targets {
            match pipeline::typed_payload(payload, &listener.payload_type) {
                Err(failure) => {
                    warn!(listener = %listener.name, detail = %failure.detail, "payload rejected");
                    self.emit_huh(
                        snapshot,
                        failure.text,
                        &msg.raw,
                        Some(prepared.envelope.from.clone()),
                        &msg.sender,
                        thread,
                    );
                }
                Ok(record) => {
                    self.spawn_dispatch(
                        snapshot.clone(),
                        listener,
                        record,
                        root_tag.clone(),
                        msg.sender.clone(),
                        thread,
                        false,
                    );
                }
            }
        }
    }

    /// Chain delivery toward a known listener name.
    async fn deliver_direct(
        &self,
        snapshot: &Arc<RegistrySnapshot>,
        msg: &InFlight,
        thread: Option<Uuid>,
        prepared: &PreparedEnvelope,
        target: String,
        descriptor: Arc<PayloadDescriptor>,
    ) {
        let Some(listener) = snapshot.lookup_by_name(&target) else {
            // The target was unregistered mid-flight. Fail safe: the emitter
            // gets a generic routing error, never a delivery that half-works.
            warn!(%target, "response target is no longer registered");
            if let Sender::Listener(name) = &msg.sender {
                if snapshot.lookup_by_name(name).is_some() {
                    self.send_system_error(SystemErrorCode::Routing, name, thread);
                }
            }
            return;
        };

        let payload = &prepared.envelope.payload;
        let diagnostic = is_core_element(payload);
        match pipeline::typed_payload(payload, &descriptor) {
            Err(failure) => {
                warn!(listener = %listener.name, detail = %failure.detail, "chain payload rejected");
                self.emit_huh(
                    snapshot,
                    failure.text,
                    &msg.raw,
                    Some(prepared.envelope.from.clone()),
                    &msg.sender,
                    thread,
                );
            }
            Ok(record) => {
                self.spawn_dispatch(
                    snapshot.clone(),
                    listener.clone(),
                    record,
                    payload.name.clone(),
                    msg.sender.clone(),
                    thread,
                    diagnostic,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_dispatch(
        &self,
        snapshot: Arc<RegistrySnapshot>,
        listener: Arc<Listener>,
        record: PayloadRecord,
        root_tag: String,
        sender: Sender,
        thread: Option<Uuid>,
        diagnostic: bool,
    ) {
        let worker = self.clone();
        tokio::spawn(async move {
            worker
                .dispatch(snapshot, listener, record, root_tag, sender, thread, diagnostic)
                .await;
        });
    }

    /// Dispatch one validated payload to one listener.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        snapshot: Arc<RegistrySnapshot>,
        listener: Arc<Listener>,
        record: PayloadRecord,
        root_tag: String,
        sender: Sender,
        thread: Option<Uuid>,
        diagnostic: bool,
    ) {
        let sender_name = sender.name().to_string();

        // Thread resolution: inherit a live UUID, otherwise open a chain.
        // Diagnostics ride whatever UUID they were addressed with; they never
        // open chains or count against budgets.
        let thread_id = match thread {
            Some(t) if self.threads.contains(t) || diagnostic => t,
            _ if diagnostic => Uuid::new_v4(),
            _ => self.threads.start_chain(
                &sender_name,
                &listener.name,
                Arc::new(TokenBudget::new(self.config.thread_token_budget_default)),
            ),
        };

        let info = self.threads.lookup(thread_id);
        let budget = self.threads.budget(thread_id);

        if !diagnostic {
            if let Some(budget) = &budget {
                if budget.is_exhausted() {
                    warn!(thread = %thread_id, listener = %listener.name, "thread budget exhausted");
                    self.send_system_error(SystemErrorCode::Budget, &listener.name, Some(thread_id));
                    self.threads.terminate_family(thread_id);
                    return;
                }
            }
            if let Some(info) = &info {
                if info.chain.len() > self.config.max_chain_depth {
                    warn!(thread = %thread_id, listener = %listener.name, "chain depth limit reached");
                    self.send_system_error(SystemErrorCode::Budget, &listener.name, Some(thread_id));
                    self.threads.terminate_family(thread_id);
                    return;
                }
            }
        }

        // Everything a handler may observe is captured here, in trusted
        // scope, before the handler runs.
        let meta = HandlerMetadata {
            thread_id,
            from_id: sender_name.clone(),
            own_name: listener.is_agent.then(|| listener.name.clone()),
            is_self_call: sender_name == listener.name,
            usage_instructions: Arc::from(snapshot.usage_instructions_for(&listener)),
            usage: UsageMeter::new(
                budget.unwrap_or_else(|| Arc::new(TokenBudget::new(u64::MAX))),
            ),
        };
        let peers = listener.peers.clone();
        let cancel = self
            .threads
            .cancel_token(thread_id)
            .unwrap_or_default();
        let deadline = Duration::from_secs(
            listener
                .timeout_secs
                .unwrap_or(self.config.handler_timeout_default_secs),
        );

        let permit = match self.handler_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        if cancel.is_cancelled() {
            return;
        }

        let payload = Payload::new(root_tag, record);
        let handler = listener.handler.clone();
        let invocation = AssertUnwindSafe(handler.handle(payload, meta)).catch_unwind();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(thread = %thread_id, listener = %listener.name, "dispatch cancelled");
                return;
            }
            outcome = tokio::time::timeout(deadline, invocation) => outcome,
        };
        drop(permit);

        match outcome {
            Err(_) => {
                warn!(thread = %thread_id, listener = %listener.name, "handler timed out");
                self.send_system_error(SystemErrorCode::Timeout, &listener.name, Some(thread_id));
            }
            Ok(Err(_)) => {
                warn!(thread = %thread_id, listener = %listener.name, "handler panicked");
                self.send_system_error(SystemErrorCode::Validation, &listener.name, Some(thread_id));
            }
            Ok(Ok(Err(err))) => {
                warn!(thread = %thread_id, listener = %listener.name, error = %err, "handler failed");
                self.send_system_error(SystemErrorCode::Validation, &listener.name, Some(thread_id));
            }
            Ok(Ok(Ok(None))) => {
                self.threads.prune_tail(thread_id);
            }
            Ok(Ok(Ok(Some(response)))) => {
                self.handle_response(&snapshot, &listener, &peers, thread_id, response);
            }
        }
    }

    /// Process a handler's return in trusted scope.
    fn handle_response(
        &self,
        snapshot: &Arc<RegistrySnapshot>,
        listener: &Arc<Listener>,
        peers: &[String],
        thread_id: Uuid,
        response: HandlerResponse,
    ) {
        match response {
            HandlerResponse::Forward { payload: record, to } => {
                if to == SELF_TARGET || to == listener.name {
                    self.forward_to_self(listener, thread_id, record);
                    return;
                }

                // Unknown target and peer violation are indistinguishable on
                // the handler surface. The chain stays alive for retry.
                let target = match snapshot.lookup_by_name(&to) {
                    Some(target) if !listener.is_agent || peers.iter().any(|p| p == &to) => {
                        target.clone()
                    }
                    _ => {
                        warn!(thread = %thread_id, listener = %listener.name, "forward target rejected");
                        self.send_system_error(
                            SystemErrorCode::Routing,
                            &listener.name,
                            Some(thread_id),
                        );
                        return;
                    }
                };

                let Some(new_thread) = self.threads.extend_chain(thread_id, &target.name) else {
                    warn!(thread = %thread_id, "chain vanished before forward");
                    return;
                };
                self.reinject(
                    &listener.name,
                    new_thread,
                    Some(target.name.clone()),
                    &record,
                    &target.root_tag,
                    CAPABILITY_NS,
                    Delivery::Resolve,
                );
            }
            HandlerResponse::Respond { payload: record } => {
                let Some(route) = self.threads.prune_for_response(thread_id) else {
                    warn!(thread = %thread_id, "chain vanished before response");
                    return;
                };
                let root_tag = owned_root_tag(&listener.name, &record.type_name);

                if route.caller_is_origin && snapshot.lookup_by_name(&route.caller).is_none() {
                    // The origin is an external client: the response leaves
                    // the organism and the chain is finished.
                    let envelope = Envelope {
                        from: listener.name.clone(),
                        thread: Some(route.thread),
                        to: Some(route.caller.clone()),
                        payload: record_to_element(&root_tag, CAPABILITY_NS, &record),
                    };
                    self.egress(route.caller.clone(), envelope.to_canonical_bytes());
                    self.threads.prune_tail(route.thread);
                    return;
                }

                let descriptor = Arc::new(record.infer_descriptor());
                self.reinject(
                    &listener.name,
                    route.thread,
                    Some(route.caller.clone()),
                    &record,
                    &root_tag,
                    CAPABILITY_NS,
                    Delivery::Direct {
                        target: route.caller,
                        descriptor,
                    },
                );
            }
        }
    }

    /// Self-iteration: extend the chain with the listener's own name and
    /// deliver directly, bypassing the registered-input schema (the payload
    /// is the agent's own working type).
    fn forward_to_self(&self, listener: &Arc<Listener>, thread_id: Uuid, record: PayloadRecord) {
        let Some(new_thread) = self.threads.extend_chain(thread_id, &listener.name) else {
            warn!(thread = %thread_id, "chain vanished before self-iteration");
            return;
        };
        let root_tag = owned_root_tag(&listener.name, &record.type_name);
        let descriptor = Arc::new(record.infer_descriptor());
        self.reinject(
            &listener.name,
            new_thread,
            Some(listener.name.clone()),
            &record,
            &root_tag,
            CAPABILITY_NS,
            Delivery::Direct {
                target: listener.name.clone(),
                descriptor,
            },
        );
    }

    /// Answer a core-namespace request from the registry's cached artifacts.
    async fn handle_meta(
        &self,
        snapshot: &Arc<RegistrySnapshot>,
        msg: &InFlight,
        thread: Option<Uuid>,
        prepared: &PreparedEnvelope,
    ) {
        let payload = &prepared.envelope.payload;
        let auth = match &msg.sender {
            Sender::External { auth, .. } => *auth,
            Sender::Listener(_) => AuthLevel::Authenticated,
            Sender::Internal(_) => AuthLevel::Admin,
        };

        let Some(request) = MetaRequest::from_element(payload) else {
            self.emit_huh(
                snapshot,
                HuhText::UnknownRootTag,
                &msg.raw,
                Some(prepared.envelope.from.clone()),
                &msg.sender,
                thread,
            );
            return;
        };

        match meta::answer(snapshot, &request, &self.config.meta_policy, auth) {
            Ok(record) => match &msg.sender {
                Sender::External { client, .. } => {
                    let envelope = Envelope {
                        from: CORE_SENDER.to_string(),
                        thread: Some(thread.unwrap_or_else(Uuid::new_v4)),
                        to: Some(client.clone()),
                        payload: record_to_element(&record.type_name, CORE_NS, &record),
                    };
                    self.egress(client.clone(), envelope.to_canonical_bytes());
                }
                Sender::Listener(name) => {
                    let descriptor = Arc::new(record.infer_descriptor());
                    self.reinject(
                        CORE_SENDER,
                        thread.unwrap_or_else(Uuid::new_v4),
                        Some(name.clone()),
                        &record,
                        &record.type_name,
                        CORE_NS,
                        Delivery::Direct {
                            target: name.clone(),
                            descriptor,
                        },
                    );
                }
                Sender::Internal(_) => {}
            },
            Err(text) => {
                self.emit_huh(
                    snapshot,
                    text,
                    &msg.raw,
                    Some(prepared.envelope.from.clone()),
                    &msg.sender,
                    thread,
                );
            }
        }
    }

    /// Envelope-level rejection: best-effort `<huh>` toward the sender.
    async fn reject(&self, msg: &InFlight, failure: PipelineFailure) {
        warn!(detail = %failure.detail, "envelope rejected");
        let snapshot = self.registry.snapshot().await;
        self.emit_huh(
            &snapshot,
            failure.text,
            &msg.raw,
            failure.sender_hint.clone(),
            &msg.sender,
            msg.thread,
        );
    }

    /// Route a `<huh>` to the offending message's sender: a registered
    /// listener gets a chain delivery, an external client gets egress,
    /// anything else is logged and dropped.
    fn emit_huh(
        &self,
        snapshot: &Arc<RegistrySnapshot>,
        text: HuhText,
        original: &[u8],
        from_hint: Option<String>,
        sender: &Sender,
        thread: Option<Uuid>,
    ) {
        let record = huh_record(text, original);
        let thread_id = thread.unwrap_or_else(Uuid::new_v4);

        if let Some(name) = &from_hint {
            if snapshot.lookup_by_name(name).is_some() {
                let descriptor = Arc::new(record.infer_descriptor());
                self.reinject(
                    SYSTEM_SENDER,
                    thread_id,
                    Some(name.clone()),
                    &record,
                    "huh",
                    CORE_NS,
                    Delivery::Direct {
                        target: name.clone(),
                        descriptor,
                    },
                );
                return;
            }
        }
        match sender {
            Sender::External { client, .. } => {
                let envelope = Envelope {
                    from: SYSTEM_SENDER.to_string(),
                    thread: Some(thread_id),
                    to: Some(client.clone()),
                    payload: record_to_element("huh", CORE_NS, &record),
                };
                self.egress(client.clone(), envelope.to_canonical_bytes());
            }
            Sender::Listener(name) => {
                if snapshot.lookup_by_name(name).is_some() {
                    let descriptor = Arc::new(record.infer_descriptor());
                    self.reinject(
                        SYSTEM_SENDER,
                        thread_id,
                        Some(name.clone()),
                        &record,
                        "huh",
                        CORE_NS,
                        Delivery::Direct {
                            target: name.clone(),
                            descriptor,
                        },
                    );
                } else {
                    debug!(sender = %name, "huh recipient unavailable, dropping");
                }
            }
            Sender::Internal(_) => {
                debug!("dropping diagnostic addressed to the core");
            }
        }
    }

    /// Deliver a generic `<SystemError>` to a listener on its thread.
    fn send_system_error(&self, code: SystemErrorCode, listener: &str, thread: Option<Uuid>) {
        let record = system_error_record(code);
        let descriptor = Arc::new(record.infer_descriptor());
        self.reinject(
            SYSTEM_SENDER,
            thread.unwrap_or_else(Uuid::new_v4),
            Some(listener.to_string()),
            &record,
            "SystemError",
            CORE_NS,
            Delivery::Direct {
                target: listener.to_string(),
                descriptor,
            },
        );
    }

    /// Envelope injection: `from` and `thread` are pump-written here and
    /// nowhere else. The bytes re-enter ingress for standard processing.
    #[allow(clippy::too_many_arguments)]
    fn reinject(
        &self,
        from: &str,
        thread: Uuid,
        to: Option<String>,
        record: &PayloadRecord,
        root_tag: &str,
        namespace: &str,
        delivery: Delivery,
    ) {
        let envelope = Envelope {
            from: from.to_string(),
            thread: Some(thread),
            to,
            payload: record_to_element(root_tag, namespace, record),
        };
        let sender = if from == SYSTEM_SENDER {
            Sender::Internal(SYSTEM_SENDER)
        } else if from == CORE_SENDER {
            Sender::Internal(CORE_SENDER)
        } else {
            Sender::Listener(from.to_string())
        };
        let in_flight = InFlight {
            raw: envelope.to_canonical_bytes(),
            sender,
            thread: Some(thread),
            delivery,
        };
        if self.ingress_tx.send(in_flight).is_err() {
            debug!("ingress closed, dropping re-injected message");
        }
    }

    fn egress(&self, client: String, bytes: Vec<u8>) {
        if self.outbox_tx.send(EgressFrame { client, bytes }).is_err() {
            debug!("outbox closed, dropping egress frame");
        }
    }
}

/// Wire root tag for a payload owned by a listener:
/// `lower(listener) . lower(type name)`.
fn owned_root_tag(listener: &str, type_name: &str) -> String {
    format!("{}.{}", listener.to_lowercase(), type_name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(tag: u8) -> InFlight {
        InFlight {
            raw: vec![tag],
            sender: Sender::Internal(SYSTEM_SENDER),
            thread: None,
            delivery: Delivery::Resolve,
        }
    }

    fn tags(scheduler: &mut Scheduler, policy: SchedulingPolicy, window: u32) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(m) = scheduler.next(policy, window) {
            out.push(m.raw[0]);
        }
        out
    }

    #[test]
    fn test_owned_root_tag_lowercases() {
        assert_eq!(owned_root_tag("Shouter", "ShoutResult"), "shouter.shoutresult");
        assert_eq!(
            owned_root_tag("calculator.add", "AddPayload"),
            "calculator.add.addpayload"
        );
    }

    #[test]
    fn test_scheduler_fifo_within_thread() {
        let key = Uuid::new_v4();
        let mut scheduler = Scheduler::new();
        for i in 0..5 {
            scheduler.push(key, msg(i));
        }
        assert_eq!(
            tags(&mut scheduler, SchedulingPolicy::BreadthFirst, 4),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_scheduler_breadth_first_interleaves() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut scheduler = Scheduler::new();
        for i in 0..6 {
            scheduler.push(a, msg(i));
        }
        for i in 10..16 {
            scheduler.push(b, msg(i));
        }

        let order = tags(&mut scheduler, SchedulingPolicy::BreadthFirst, 2);
        // No more than 2 consecutive messages from the same thread while the
        // other still has ready messages.
        let mut run = 1;
        for window in order.windows(2) {
            let same = (window[0] < 10) == (window[1] < 10);
            run = if same { run + 1 } else { 1 };
            assert!(run <= 2, "fairness window exceeded in {order:?}");
        }
        assert_eq!(order.len(), 12);
    }

    #[test]
    fn test_scheduler_depth_first_drains_thread() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut scheduler = Scheduler::new();
        for i in 0..3 {
            scheduler.push(a, msg(i));
        }
        for i in 10..13 {
            scheduler.push(b, msg(i));
        }

        let order = tags(&mut scheduler, SchedulingPolicy::DepthFirst, 4);
        assert_eq!(order, vec![0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn test_scheduler_single_thread_ignores_window() {
        let key = Uuid::new_v4();
        let mut scheduler = Scheduler::new();
        for i in 0..10 {
            scheduler.push(key, msg(i));
        }
        // With one active thread the window never blocks progress.
        let order = tags(&mut scheduler, SchedulingPolicy::BreadthFirst, 2);
        assert_eq!(order.len(), 10);
    }

    #[test]
    fn test_scheduler_empty() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.is_empty());
        assert!(scheduler
            .next(SchedulingPolicy::BreadthFirst, 4)
            .is_none());
    }
}
