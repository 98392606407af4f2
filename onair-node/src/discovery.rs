//! Discovery collaborator contract.
//!
//! The synchronizer only sees `PeerUp` / `PeerDown` events and the
//! announce / stop-announce pair. `StaticDiscovery` seeds peers from
//! configuration and hands out a `DiscoveryHandle` through which any other
//! transport (an mDNS bridge, tests) can inject events.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::registry::PeerRecord;

/// Membership change reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    PeerUp(PeerRecord),
    PeerDown { identity: String },
}

/// Discovery transport owned by the synchronizer
pub trait Discovery: Send {
    /// Start delivering membership events
    fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>>;

    /// Stop delivering membership events
    fn unsubscribe(&mut self) -> Result<()>;

    /// Announce this node's presence
    fn announce(&mut self, name: &str, port: u16) -> Result<()>;

    /// Withdraw this node's announcement
    fn stop_announce(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Subscription {
    sender: Option<mpsc::UnboundedSender<DiscoveryEvent>>,
    announced: Option<(String, u16)>,
}

impl Subscription {
    fn deliver(&self, event: DiscoveryEvent) -> bool {
        if let DiscoveryEvent::PeerUp(peer) = &event {
            if self.announced.as_ref().map(|(name, _)| name) == Some(&peer.identity) {
                debug!(peer = %peer.identity, "Ignoring discovery of our own service");
                return false;
            }
        }

        match &self.sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

/// Handle for injecting discovery events into a `StaticDiscovery`
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    inner: Arc<Mutex<Subscription>>,
}

impl DiscoveryHandle {
    /// Report a peer as live. Returns false if nobody is subscribed.
    pub fn peer_up(&self, peer: PeerRecord) -> bool {
        self.deliver(DiscoveryEvent::PeerUp(peer))
    }

    /// Report a peer as gone. Returns false if nobody is subscribed.
    pub fn peer_down(&self, identity: impl Into<String>) -> bool {
        self.deliver(DiscoveryEvent::PeerDown {
            identity: identity.into(),
        })
    }

    /// Currently announced service, if any
    pub fn announced(&self) -> Option<(String, u16)> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .announced
            .clone()
    }

    fn deliver(&self, event: DiscoveryEvent) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .deliver(event)
    }
}

/// Discovery from a fixed peer list plus injected events
#[derive(Debug)]
pub struct StaticDiscovery {
    peers: Vec<PeerRecord>,
    inner: Arc<Mutex<Subscription>>,
}

impl StaticDiscovery {
    pub fn new(peers: Vec<PeerRecord>) -> Self {
        Self {
            peers,
            inner: Arc::new(Mutex::new(Subscription::default())),
        }
    }

    pub fn handle(&self) -> DiscoveryHandle {
        DiscoveryHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Discovery for StaticDiscovery {
    fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sender = Some(sender);

        for peer in &self.peers {
            inner.deliver(DiscoveryEvent::PeerUp(peer.clone()));
        }

        info!(static_peers = self.peers.len(), "Discovery subscribed");
        Ok(receiver)
    }

    fn unsubscribe(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sender = None;
        Ok(())
    }

    fn announce(&mut self, name: &str, port: u16) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((existing, _)) = &inner.announced {
            return Err(SyncError::Startup(format!(
                "service \"{}\" is already announced",
                existing
            )));
        }
        inner.announced = Some((name.to_string(), port));
        info!(name = %name, port = port, "Announced service");
        Ok(())
    }

    fn stop_announce(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.announced.take() {
            Some((name, _)) => {
                info!(name = %name, "Withdrew service announcement");
                Ok(())
            }
            None => Err(SyncError::Shutdown("no service announced".to_string())),
        }
    }
}
