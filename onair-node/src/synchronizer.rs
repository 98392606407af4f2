//! Status synchronizer
//!
//! Owns the peer registry and the status map, recomputes the aggregate
//! output after every change, and fans local status changes out to peers.
//! Every push acknowledgement carries the receiver's own status, which is
//! folded back into the map so one round trip syncs both directions.

use futures::future::join_all;
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregate::StatusMap;
use crate::config::NodeConfig;
use crate::discovery::{Discovery, DiscoveryEvent};
use crate::error::{Result, SyncError};
use crate::output::OutputSink;
use crate::push::{PushClient, PushRequest, PushServer};
use crate::registry::{PeerRecord, PeerRegistry};
use crate::status::{Rank, StatusOrdering};

/// Ordering of pushes sent to one peer
///
/// Sequence numbers grow for the lifetime of the process, even across a
/// peer leaving and coming back, so an acknowledgement is only applied when
/// it answers a push newer than anything already reflected for that peer.
#[derive(Debug, Default, Clone, Copy)]
struct PushSequence {
    issued: u64,
    applied: u64,
}

impl PushSequence {
    fn next(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    fn accept(&mut self, seq: u64) -> bool {
        if seq > self.applied {
            self.applied = seq;
            true
        } else {
            false
        }
    }

    /// Invalidate every acknowledgement still in flight
    fn supersede(&mut self) {
        self.applied = self.issued;
    }
}

struct SyncState {
    registry: PeerRegistry,
    statuses: StatusMap,
    output: Rank,
    sequences: HashMap<String, PushSequence>,
    /// Serializes outbound pushes to each peer
    lanes: HashMap<String, Arc<Mutex<()>>>,
}

impl SyncState {
    fn lane(&mut self, identity: &str) -> Arc<Mutex<()>> {
        self.lanes
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

struct Shared {
    identity: String,
    ordering: Arc<StatusOrdering>,
    client: PushClient,
    output: Arc<dyn OutputSink>,
    state: Mutex<SyncState>,
}

/// Cloneable handle to one node's synchronization state
///
/// All mutations go through a single lock, so a recompute always sees the
/// map as of the change that triggered it.
#[derive(Clone)]
pub struct SyncHandle {
    inner: Arc<Shared>,
}

/// Outbound pushes started by one operation
#[derive(Debug, Default)]
pub struct Dispatched {
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatched {
    fn add(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until every push has either been acknowledged or failed
    pub async fn settled(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Status push task panicked");
                }
            }
        }
    }
}

/// Point-in-time view of a node, as served by the management API
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub identity: String,
    pub local_status: String,
    pub output_status: String,
    pub statuses: Vec<String>,
    pub peers: Vec<PeerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub identity: String,
    /// Absent when a status arrived from a node discovery has not reported
    pub address: Option<String>,
    pub port: Option<u16>,
    pub status: Option<String>,
}

impl SyncHandle {
    /// Fresh state: no peers, self at the default status
    pub fn new(config: &NodeConfig, output: Arc<dyn OutputSink>) -> Result<Self> {
        config.validate()?;

        let ordering = Arc::new(StatusOrdering::new(
            &config.statuses,
            &config.default_status,
        )?);
        let client = PushClient::new(config.push_timeout())?;
        let identity = config.identity().to_string();

        let mut statuses = StatusMap::new(ordering.clone());
        statuses.set_status(&identity, ordering.default_status())?;

        let state = SyncState {
            registry: PeerRegistry::new(),
            statuses,
            output: ordering.default_rank(),
            sequences: HashMap::new(),
            lanes: HashMap::new(),
        };

        Ok(Self {
            inner: Arc::new(Shared {
                identity,
                ordering,
                client,
                output,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn ordering(&self) -> &StatusOrdering {
        &self.inner.ordering
    }

    /// Current aggregate output status
    pub async fn output_status(&self) -> String {
        let state = self.inner.state.lock().await;
        self.inner.ordering.name(state.output).to_string()
    }

    /// This node's own status
    pub async fn local_status(&self) -> String {
        let state = self.inner.state.lock().await;
        self.own_status(&state).to_string()
    }

    /// Last known status of any identity, this node included
    pub async fn status_of(&self, identity: &str) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.statuses.get(identity).map(str::to_string)
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.state.lock().await.registry.len()
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        let state = self.inner.state.lock().await;
        let identity = self.identity();

        let mut peers: BTreeMap<String, PeerSnapshot> = state
            .registry
            .all()
            .into_iter()
            .map(|peer| {
                let snapshot = PeerSnapshot {
                    status: state.statuses.get(&peer.identity).map(str::to_string),
                    identity: peer.identity.clone(),
                    address: Some(peer.address),
                    port: Some(peer.port),
                };
                (peer.identity, snapshot)
            })
            .collect();

        for other in state.statuses.identities().filter(|id| *id != identity) {
            peers.entry(other.to_string()).or_insert_with(|| PeerSnapshot {
                identity: other.to_string(),
                address: None,
                port: None,
                status: state.statuses.get(other).map(str::to_string),
            });
        }

        SyncSnapshot {
            identity: identity.to_string(),
            local_status: self.own_status(&state).to_string(),
            output_status: self.inner.ordering.name(state.output).to_string(),
            statuses: self.inner.ordering.names().to_vec(),
            peers: peers.into_values().collect(),
        }
    }

    /// Change this node's status and push it to every known peer
    ///
    /// The output is recomputed before any push goes out.
    pub async fn set_local_status(&self, status: &str) -> Result<Dispatched> {
        let mut state = self.inner.state.lock().await;

        if let Err(e) = state.statuses.set_status(self.identity(), status) {
            warn!(status = %status, "Rejected local status");
            return Err(e);
        }
        info!(status = %status, "Local status set");
        self.recompute(&mut state);

        let mut dispatched = Dispatched::default();
        for peer in state.registry.all() {
            let lane = state.lane(&peer.identity);
            dispatched.add(self.spawn_push(peer.identity, lane));
        }

        debug!(peers = dispatched.len(), "Status pushes dispatched");
        Ok(dispatched)
    }

    /// Register a discovered peer and bootstrap it with our status
    ///
    /// A re-announced peer only has its address refreshed.
    pub async fn on_peer_up(&self, peer: PeerRecord) -> Dispatched {
        let mut dispatched = Dispatched::default();
        if peer.identity == self.identity() {
            debug!("Ignoring discovery of our own service");
            return dispatched;
        }

        let mut state = self.inner.state.lock().await;
        let is_new = state.registry.on_peer_up(peer.clone());
        gauge!("known_peers", state.registry.len() as f64);
        self.recompute(&mut state);

        if !is_new {
            debug!(peer = %peer.identity, address = %peer.address, port = peer.port, "Peer re-announced");
            return dispatched;
        }

        info!(peer = %peer.identity, address = %peer.address, port = peer.port, "Peer discovered");
        let lane = state.lane(&peer.identity);
        dispatched.add(self.spawn_push(peer.identity, lane));
        dispatched
    }

    /// Forget a peer and its status
    ///
    /// A status learned from a node discovery never reported is dropped too.
    pub async fn on_peer_down(&self, identity: &str) {
        if identity == self.identity() {
            debug!("Ignoring loss of our own service");
            return;
        }

        let mut state = self.inner.state.lock().await;
        let removed_peer = state.registry.on_peer_down(identity).is_some();
        let removed_status = state.statuses.remove_status(identity).is_some();
        if let Some(sequence) = state.sequences.get_mut(identity) {
            sequence.supersede();
        }

        if !removed_peer && !removed_status {
            debug!(peer = %identity, "Peer down for unknown identity");
            return;
        }

        info!(peer = %identity, "Peer gone");
        gauge!("known_peers", state.registry.len() as f64);
        self.recompute(&mut state);
    }

    /// Record a status pushed by a peer and return our own for the ack
    pub async fn on_incoming_push(&self, identity: &str, status: &str) -> Result<String> {
        if identity.is_empty() {
            return Err(SyncError::ProtocolMismatch(
                "push carries no identity".to_string(),
            ));
        }
        if identity == self.identity() {
            return Err(SyncError::ProtocolMismatch(
                "push carries this node's own identity".to_string(),
            ));
        }
        if !self.inner.ordering.contains(status) {
            return Err(SyncError::ProtocolMismatch(format!(
                "unknown status \"{}\" from {}",
                status, identity
            )));
        }

        let mut state = self.inner.state.lock().await;
        state.statuses.set_status(identity, status)?;
        // A direct push is newer than any ack still on its way from that peer
        if let Some(sequence) = state.sequences.get_mut(identity) {
            sequence.supersede();
        }

        debug!(peer = %identity, status = %status, "Status push received");
        self.recompute(&mut state);
        Ok(self.own_status(&state).to_string())
    }

    /// Return to the initial state: no peers, self at the default status
    pub(crate) async fn reset(&self) {
        let mut state = self.inner.state.lock().await;
        let identity = self.identity();

        state.registry.clear();
        state.statuses.retain(|id| id == identity);
        if let Err(e) = state
            .statuses
            .set_status(identity, self.inner.ordering.default_status())
        {
            error!(error = %e, "Failed to reset local status");
        }
        for sequence in state.sequences.values_mut() {
            sequence.supersede();
        }

        gauge!("known_peers", 0.0);
        self.recompute(&mut state);
    }

    fn own_status<'a>(&'a self, state: &'a SyncState) -> &'a str {
        state
            .statuses
            .get(self.identity())
            .unwrap_or_else(|| self.inner.ordering.default_status())
    }

    fn own_request(&self, state: &SyncState) -> PushRequest {
        PushRequest {
            identity: self.identity().to_string(),
            status: self.own_status(state).to_string(),
        }
    }

    /// Recompute the aggregate and notify the sink if it moved
    fn recompute(&self, state: &mut SyncState) -> bool {
        let rank = state.statuses.aggregate_rank(self.inner.ordering.default_rank());
        if rank == state.output {
            return false;
        }

        state.output = rank;
        let status = self.inner.ordering.name(rank);
        debug!(status = %status, "Output status changed");
        counter!("output_status_changes", 1);
        self.inner.output.output_changed(status);
        true
    }

    fn spawn_push(&self, identity: String, lane: Arc<Mutex<()>>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            handle.push_to_peer(&identity, lane).await;
        })
    }

    /// Push our current status to one peer, after any earlier push to it
    ///
    /// The payload is read once the lane is held, so whichever push to a
    /// peer completes last carries this node's newest status.
    async fn push_to_peer(&self, identity: &str, lane: Arc<Mutex<()>>) {
        let _lane = lane.lock().await;

        let (peer, request, seq) = {
            let mut state = self.inner.state.lock().await;
            let Some(peer) = state.registry.get(identity).cloned() else {
                debug!(peer = %identity, "Peer left before push, skipping");
                return;
            };
            let request = self.own_request(&state);
            let seq = state
                .sequences
                .entry(identity.to_string())
                .or_default()
                .next();
            (peer, request, seq)
        };

        counter!("status_pushes_sent", 1);
        match self.inner.client.push(&peer, &request).await {
            Ok(ack) => self.record_ack(&peer.identity, seq, &ack).await,
            Err(e) => {
                counter!("status_push_failures", 1);
                warn!(peer = %peer.identity, error = %e, "Status push failed");
            }
        }
    }

    /// Fold a peer's acknowledged status into the map
    async fn record_ack(&self, identity: &str, seq: u64, status: &str) {
        let mut state = self.inner.state.lock().await;

        if !state.registry.contains(identity) {
            debug!(peer = %identity, "Discarding acknowledgement from departed peer");
            return;
        }
        if !self.inner.ordering.contains(status) {
            let e = SyncError::ProtocolMismatch(format!(
                "{} acknowledged with unknown status \"{}\"",
                identity, status
            ));
            warn!(error = %e, "Discarding acknowledgement");
            return;
        }
        let accepted = state
            .sequences
            .entry(identity.to_string())
            .or_default()
            .accept(seq);
        if !accepted {
            debug!(peer = %identity, seq, "Discarding stale acknowledgement");
            return;
        }

        if let Err(e) = state.statuses.set_status(identity, status) {
            warn!(peer = %identity, error = %e, "Failed to record acknowledged status");
            return;
        }
        debug!(peer = %identity, status = %status, "Acknowledged status recorded");
        self.recompute(&mut state);
    }
}

/// Apply discovery events to the synchronizer until the stream closes
async fn run_discovery_loop(handle: SyncHandle, mut events: mpsc::UnboundedReceiver<DiscoveryEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DiscoveryEvent::PeerUp(peer) => {
                let _ = handle.on_peer_up(peer).await;
            }
            DiscoveryEvent::PeerDown { identity } => handle.on_peer_down(&identity).await,
        }
    }
    debug!("Discovery event stream closed");
}

/// A running node: push listener, discovery subscription and event loop
pub struct Synchronizer {
    handle: SyncHandle,
    discovery: Box<dyn Discovery>,
    server: Option<PushServer>,
    events_task: Option<JoinHandle<()>>,
    running: bool,
}

impl Synchronizer {
    /// Bind the push API, announce it and start following discovery
    pub async fn start(
        config: &NodeConfig,
        mut discovery: Box<dyn Discovery>,
        output: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        let handle = SyncHandle::new(config, output)?;
        let mut server = PushServer::bind(&config.bind_addr(), handle.clone()).await?;
        let port = server.local_addr().port();

        if let Err(e) = discovery.announce(handle.identity(), port) {
            let _ = server.shutdown().await;
            return Err(SyncError::Startup(format!("Failed to announce service: {}", e)));
        }

        let events = match discovery.subscribe() {
            Ok(events) => events,
            Err(e) => {
                let _ = discovery.stop_announce();
                let _ = server.shutdown().await;
                return Err(SyncError::Startup(format!(
                    "Failed to subscribe to discovery: {}",
                    e
                )));
            }
        };

        let events_task = tokio::spawn(run_discovery_loop(handle.clone(), events));

        info!(
            identity = %handle.identity(),
            addr = %server.local_addr(),
            "Synchronizer started"
        );

        Ok(Self {
            handle,
            discovery,
            server: Some(server),
            events_task: Some(events_task),
            running: true,
        })
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Address the push API is listening on, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(PushServer::local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Withdraw from the network and reset to the initial state
    ///
    /// Every step is attempted even if an earlier one fails.
    pub async fn stop(&mut self) {
        if !self.running {
            debug!("Synchronizer already stopped");
            return;
        }
        self.running = false;
        info!("Stopping synchronizer");

        if let Err(e) = self.discovery.stop_announce() {
            warn!(error = %e, "Failed to withdraw service announcement");
        }
        if let Err(e) = self.discovery.unsubscribe() {
            warn!(error = %e, "Failed to unsubscribe from discovery");
        }
        if let Some(task) = self.events_task.take() {
            task.abort();
        }
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.shutdown().await {
                warn!(error = %e, "Failed to stop push API");
            }
        }

        self.handle.reset().await;
        info!("Synchronizer stopped");
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if self.running {
            let _ = self.discovery.stop_announce();
            if let Some(task) = self.events_task.take() {
                task.abort();
            }
        }
    }
}
