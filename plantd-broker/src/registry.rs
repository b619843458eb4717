//! Broker-internal registries: worker records, per-service FIFO
//! queues, and the dispatch/lifecycle algorithm from spec §4.4.
//!
//! Owned exclusively by the broker's single task (spec §5): plain
//! `std::collections` are correct here, not `dashmap` or other
//! concurrent structures, because nothing else ever touches them.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use flume::Sender;
use plantd_core::router::RouterCmd;
use plantd_protocol::message::{Header, Message};

use crate::config::BrokerConfig;

struct WorkerRecord {
    service: Bytes,
    last_heard: Instant,
    last_sent: Instant,
    busy: bool,
}

struct PendingRequest {
    client: Bytes,
    payload: Vec<Bytes>,
}

struct ServiceRecord {
    idle: VecDeque<Bytes>,
    requests: VecDeque<PendingRequest>,
}

impl ServiceRecord {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            requests: VecDeque::new(),
        }
    }
}

/// Owns every piece of broker-internal state: the worker table and
/// one [`ServiceRecord`] per service name.
pub struct Broker {
    config: BrokerConfig,
    workers: HashMap<Bytes, WorkerRecord>,
    services: HashMap<Bytes, ServiceRecord>,
}

impl Broker {
    /// Construct an empty broker state.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            workers: HashMap::new(),
            services: HashMap::new(),
        }
    }

    /// Number of currently registered workers (idle + busy). Exposed
    /// for tests and introspection.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Whether `service` currently has at least one idle worker.
    #[must_use]
    pub fn has_idle_worker(&self, service: &[u8]) -> bool {
        self.services.get(service).is_some_and(|r| !r.idle.is_empty())
    }

    /// Dispatch one inbound message, reacting per spec §4.4.
    pub fn handle_inbound(&mut self, identity: Bytes, message: Message, cmd_tx: &Sender<RouterCmd>) {
        match message {
            Message::ClientRequest { service, payload } => {
                self.handle_client_request(identity, service, payload, cmd_tx);
            }
            Message::WorkerReady { service } => self.handle_worker_ready(identity, service, cmd_tx),
            Message::WorkerReply { client, payload } => {
                self.handle_worker_reply(identity, client, payload, cmd_tx);
            }
            Message::Heartbeat { header } => self.handle_heartbeat(identity, header),
            Message::Disconnect { .. } => self.remove_worker(&identity),
            Message::ClientReply { .. } | Message::WorkerRequest { .. } => {
                tracing::warn!(?identity, "dropped broker-outbound-only command received as inbound");
            }
        }
    }

    fn handle_client_request(
        &mut self,
        client: Bytes,
        service: Bytes,
        payload: Vec<Bytes>,
        cmd_tx: &Sender<RouterCmd>,
    ) {
        if service.starts_with(b"mmi.") {
            self.handle_mmi(client, service, payload, cmd_tx);
            return;
        }

        let idle_worker = {
            let record = self.services.entry(service.clone()).or_insert_with(ServiceRecord::new);
            record.idle.pop_front()
        };

        match idle_worker {
            Some(worker) => self.dispatch_to_worker(&worker, PendingRequest { client, payload }, cmd_tx),
            None => {
                let record = self
                    .services
                    .get_mut(&service)
                    .expect("service record just inserted above");
                if record.requests.len() >= self.config.max_queue {
                    record.requests.pop_front();
                    tracing::warn!(
                        service = %String::from_utf8_lossy(&service),
                        depth = record.requests.len(),
                        "pending-request queue full; dropped oldest request"
                    );
                }
                record.requests.push_back(PendingRequest { client, payload });
            }
        }
    }

    fn handle_mmi(&mut self, client: Bytes, service: Bytes, payload: Vec<Bytes>, cmd_tx: &Sender<RouterCmd>) {
        if service.as_ref() == b"mmi.service" {
            let queried = payload.first().cloned().unwrap_or_default();
            let status: &[u8] = if self.has_idle_worker(&queried) { b"200" } else { b"404" };
            let reply = Message::ClientReply {
                service,
                payload: vec![Bytes::from_static(status)],
            };
            self.send_to(&client, &reply, cmd_tx);
        } else {
            tracing::debug!(
                service = %String::from_utf8_lossy(&service),
                "reserved mmi.* query not implemented"
            );
            let reply = Message::ClientReply {
                service,
                payload: vec![Bytes::from_static(b"501")],
            };
            self.send_to(&client, &reply, cmd_tx);
        }
    }

    fn handle_worker_ready(&mut self, identity: Bytes, service: Bytes, cmd_tx: &Sender<RouterCmd>) {
        if self.workers.contains_key(&identity) {
            tracing::warn!(?identity, "duplicate READY from an already-registered worker; disconnecting");
            self.remove_worker(&identity);
            let _ = cmd_tx.send(RouterCmd::ClosePeer(identity));
            return;
        }

        let now = Instant::now();
        self.workers.insert(
            identity.clone(),
            WorkerRecord {
                service: service.clone(),
                last_heard: now,
                last_sent: now,
                busy: false,
            },
        );
        tracing::debug!(
            ?identity,
            service = %String::from_utf8_lossy(&service),
            "worker registered"
        );

        self.make_worker_available(identity, service, cmd_tx);
    }

    fn handle_worker_reply(&mut self, identity: Bytes, client: Bytes, payload: Vec<Bytes>, cmd_tx: &Sender<RouterCmd>) {
        let Some(service) = self.workers.get(&identity).map(|w| w.service.clone()) else {
            tracing::warn!(?identity, "REPLY from an unregistered worker; dropping");
            return;
        };

        if let Some(worker) = self.workers.get_mut(&identity) {
            worker.last_heard = Instant::now();
        }

        let reply = Message::ClientReply { service: service.clone(), payload };
        self.send_to(&client, &reply, cmd_tx);

        self.make_worker_available(identity, service, cmd_tx);
    }

    /// Common tail of READY and REPLY handling: a worker has just
    /// become available. If its service has a pending request, dispatch
    /// immediately (the worker stays busy); otherwise append it to the
    /// idle queue's tail.
    fn make_worker_available(&mut self, identity: Bytes, service: Bytes, cmd_tx: &Sender<RouterCmd>) {
        let pending = self
            .services
            .get_mut(&service)
            .and_then(|record| record.requests.pop_front());

        match pending {
            Some(request) => self.dispatch_to_worker(&identity, request, cmd_tx),
            None => {
                if let Some(worker) = self.workers.get_mut(&identity) {
                    worker.busy = false;
                }
                let record = self.services.entry(service).or_insert_with(ServiceRecord::new);
                record.idle.push_back(identity);
            }
        }
    }

    fn dispatch_to_worker(&mut self, identity: &Bytes, request: PendingRequest, cmd_tx: &Sender<RouterCmd>) {
        if let Some(worker) = self.workers.get_mut(identity) {
            worker.busy = true;
            worker.last_sent = Instant::now();
        }
        let message = Message::WorkerRequest {
            client: request.client,
            payload: request.payload,
        };
        self.send_to(identity, &message, cmd_tx);
    }

    fn handle_heartbeat(&mut self, identity: Bytes, header: Header) {
        if header != Header::Worker {
            tracing::debug!(?identity, "ignoring client-header heartbeat (protocol violation)");
            return;
        }
        match self.workers.get_mut(&identity) {
            Some(worker) => worker.last_heard = Instant::now(),
            None => tracing::debug!(?identity, "heartbeat from an unknown worker; ignoring"),
        }
    }

    fn remove_worker(&mut self, identity: &Bytes) {
        if let Some(worker) = self.workers.remove(identity) {
            if let Some(record) = self.services.get_mut(&worker.service) {
                record.idle.retain(|id| id != identity);
            }
            tracing::debug!(?identity, "worker removed");
        }
    }

    /// Advance heartbeat and expiry timers. Called once per main-loop tick.
    pub fn run_timers(&mut self, cmd_tx: &Sender<RouterCmd>) {
        let now = Instant::now();
        let liveness_window = self.config.liveness_window();

        let expired: Vec<Bytes> = self
            .workers
            .iter()
            .filter(|(_, worker)| now.duration_since(worker.last_heard) > liveness_window)
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in expired {
            tracing::info!(?identity, "worker expired: missed too many heartbeats");
            self.remove_worker(&identity);
        }

        let due_for_heartbeat: Vec<Bytes> = self
            .workers
            .iter()
            .filter(|(_, worker)| {
                !worker.busy && now.duration_since(worker.last_sent) >= self.config.heartbeat_interval
            })
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in due_for_heartbeat {
            self.send_to(&identity, &Message::Heartbeat { header: Header::Worker }, cmd_tx);
            if let Some(worker) = self.workers.get_mut(&identity) {
                worker.last_sent = now;
            }
        }
    }

    /// Best-effort disconnect of every registered worker, for graceful
    /// shutdown: drains the socket side by telling every peer, then
    /// closes the hub.
    pub fn shutdown(&mut self, cmd_tx: &Sender<RouterCmd>) {
        let identities: Vec<Bytes> = self.workers.keys().cloned().collect();
        for identity in identities {
            self.send_to(&identity, &Message::Disconnect { header: Header::Worker }, cmd_tx);
        }
        let _ = cmd_tx.send(RouterCmd::Close);
    }

    fn send_to(&self, identity: &Bytes, message: &Message, cmd_tx: &Sender<RouterCmd>) {
        let mut frames = Vec::with_capacity(4);
        frames.push(identity.clone());
        frames.extend(message.encode());
        let _ = cmd_tx.send(RouterCmd::SendMessage(frames));
    }
}
