//! Mesh Peer - Gossip membership and replicated chat log
//!
//! A [`MeshPeer`] registers one identity with a transport, bootstraps off the
//! well-known seed peer, and gossips its way to a full mesh: every connection
//! is greeted with the complete peer list and chat history, and every peer
//! mentioned in a greeting gets dialed in turn. Chat lines spread to all open
//! connections and are deduplicated by their author-minted ids, so meeting the
//! same line twice is harmless.
//!
//! All state lives behind locks inside a shared inner value; the public handle
//! is cheap to query from synchronous code. Dropping the handle aborts every
//! background task, which closes the peer's connections and frees its identity
//! on the transport.

use crate::identity::PeerId;
use crate::message::{ChatLine, ChatLog, ConnectMetadata, WireMessage};
use crate::transport::{Connection, Endpoint, Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sender label used for lines authored by an unnamed (seed) peer.
const SEED_SENDER: &str = "seed";

/// Tunables for a mesh peer. The default is right for almost everyone; swap
/// `seed_id` to run several independent meshes on one transport.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Identity the bootstrap peer registers under. Named peers derive their
    /// own identities from it, so it doubles as the mesh namespace.
    pub seed_id: PeerId,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            seed_id: PeerId::seed(),
        }
    }
}

/// A mesh failure surfaced to the application.
///
/// Failures are recorded and published, never fatal: the peer keeps serving
/// whatever connections it already has.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeshError {
    /// Another live peer is already registered under this identity.
    #[error("{0} is already taken")]
    IdentityUnavailable(PeerId),
    /// A dial target was not reachable on the transport.
    #[error("peer {0} is unreachable")]
    PeerUnreachable(PeerId),
    /// Any other transport failure, passed through as reported.
    #[error("{0}")]
    Transport(String),
}

impl From<TransportError> for MeshError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::IdentityTaken(id) => MeshError::IdentityUnavailable(id),
            TransportError::PeerUnreachable(id) => MeshError::PeerUnreachable(id),
            other => MeshError::Transport(other.to_string()),
        }
    }
}

/// Returned by [`MeshPeer::send_message`] while registration is still in
/// flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("peer is still registering with the transport")]
pub struct NotReadyError;

type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: HashMap<u64, UpdateCallback>,
}

/// Handle for one registered update callback. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Subscribers>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().callbacks.remove(&self.id);
        }
    }
}

struct PeerState {
    loading: bool,
    error: Option<MeshError>,
    chat_log: ChatLog,
    connections: HashMap<PeerId, Arc<dyn Connection>>,
    /// Peers with a dial or handshake in flight. Keeps a remote from being
    /// connected twice and keeps us from dialing anyone twice.
    pending: HashSet<PeerId>,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            loading: true,
            error: None,
            chat_log: ChatLog::new(),
            connections: HashMap::new(),
            pending: HashSet::new(),
        }
    }
}

/// One outgoing message and the connections it goes to.
type OutboundJob = (WireMessage, Vec<Arc<dyn Connection>>);

struct PeerInner {
    id: PeerId,
    display_name: Option<String>,
    seed_id: PeerId,
    state: RwLock<PeerState>,
    endpoint: RwLock<Option<Arc<dyn Endpoint>>>,
    /// All protocol sends are queued here and delivered by one pump task, so
    /// every channel sees this peer's messages in queueing order. Jobs are
    /// queued while holding the state lock, which ties queue order to state
    /// order.
    outbound: mpsc::UnboundedSender<OutboundJob>,
    subscribers: Arc<Mutex<Subscribers>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One node in the chat mesh.
///
/// Construction registers with the transport in the background; queries are
/// answered from local state at any time, and [`MeshPeer::send_message`] is
/// gated until registration completes. Subscribe to learn when anything
/// observable changes.
pub struct MeshPeer {
    inner: Arc<PeerInner>,
}

impl MeshPeer {
    /// Start a peer on the default mesh. `display_name` of `None` makes this
    /// the seed peer; anything else derives a namespaced identity from the
    /// name. Must be called from within a Tokio runtime.
    pub fn new(display_name: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(display_name, transport, MeshConfig::default())
    }

    /// Start a peer with an explicit [`MeshConfig`].
    pub fn with_config(
        display_name: Option<&str>,
        transport: Arc<dyn Transport>,
        config: MeshConfig,
    ) -> Self {
        let id = match display_name {
            Some(name) => config.seed_id.derive(name),
            None => config.seed_id.clone(),
        };
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PeerInner {
            id,
            display_name: display_name.map(str::to_owned),
            seed_id: config.seed_id,
            state: RwLock::new(PeerState::default()),
            endpoint: RwLock::new(None),
            outbound: outbound_tx,
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            tasks: Mutex::new(Vec::new()),
        });
        let pump = tokio::spawn(PeerInner::pump_outbound(inner.clone(), outbound_rx));
        inner.track(pump);
        let handle = tokio::spawn(PeerInner::run(inner.clone(), transport));
        inner.track(handle);
        Self { inner }
    }

    /// Identity this peer registers under.
    pub fn id(&self) -> PeerId {
        self.inner.id.clone()
    }

    /// Display name, or `None` for the seed peer.
    pub fn display_name(&self) -> Option<&str> {
        self.inner.display_name.as_deref()
    }

    /// Whether transport registration is still in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.state.read().loading
    }

    /// Most recent failure, if any. Cleared when registration succeeds.
    pub fn current_error(&self) -> Option<MeshError> {
        self.inner.state.read().error.clone()
    }

    /// The chat log in the order lines were first seen here.
    pub fn chat_log(&self) -> Vec<ChatLine> {
        self.inner.state.read().chat_log.lines().to_vec()
    }

    /// Identities with an open connection, sorted for stable output.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.state.read().connections.keys().cloned().collect();
        peers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        peers
    }

    /// Append a chat line locally and gossip it to every open connection.
    pub fn send_message(&self, content: &str) -> Result<(), NotReadyError> {
        self.inner.send_message(content)
    }

    /// Register a callback invoked after every observable change: chat lines,
    /// connections, loading state, errors. Runs synchronously with no locks
    /// held, so it may query the peer freely. Drop the returned handle to
    /// unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut subs = self.inner.subscribers.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.callbacks.insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner.subscribers),
        }
    }
}

impl Drop for MeshPeer {
    fn drop(&mut self) {
        // Aborting the tasks drops their connection handles, which is what
        // closes this peer's links and releases its identity.
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl PeerInner {
    /// Register with the transport, dial the seed, then accept inbound
    /// connections until the endpoint shuts down.
    async fn run(this: Arc<Self>, transport: Arc<dyn Transport>) {
        let endpoint: Arc<dyn Endpoint> = match transport.register(this.id.clone()).await {
            Ok(endpoint) => Arc::from(endpoint),
            Err(err) => {
                let error = MeshError::from(err);
                warn!(peer = %this.id, %error, "registration failed");
                {
                    let mut state = this.state.write();
                    state.loading = false;
                    state.error = Some(error);
                }
                this.notify();
                return;
            }
        };

        *this.endpoint.write() = Some(endpoint.clone());
        {
            let mut state = this.state.write();
            state.loading = false;
            state.error = None;
        }
        debug!(peer = %this.id, "registered with transport");
        this.notify();

        // The seed has no one to dial; everyone else bootstraps through it.
        if this.id != this.seed_id {
            Self::open_connection_to(&this, this.seed_id.clone());
        }

        while let Some(conn) = endpoint.accept().await {
            Self::adopt(&this, conn);
        }
    }

    /// Deliver queued outbound messages one job at a time. Failed deliveries
    /// are dropped here; the channel's own close event cleans up the
    /// connection.
    async fn pump_outbound(this: Arc<Self>, mut jobs: mpsc::UnboundedReceiver<OutboundJob>) {
        while let Some((msg, targets)) = jobs.recv().await {
            for conn in targets {
                if let Err(error) = conn.send(&msg).await {
                    debug!(peer = %this.id, remote = %conn.remote_id(), %error, "message not delivered");
                }
            }
        }
    }

    /// Take over an inbound connection, unless the remote is already
    /// connected or mid-handshake.
    fn adopt(this: &Arc<Self>, conn: Arc<dyn Connection>) {
        let remote = conn.remote_id().clone();
        {
            let mut state = this.state.write();
            if state.connections.contains_key(&remote) || !state.pending.insert(remote.clone()) {
                debug!(peer = %this.id, %remote, "dropping duplicate connection");
                return;
            }
        }
        Self::handle_connection(this, remote, conn);
    }

    /// Drive one connection, inbound or outbound: dial everyone it
    /// advertises, wait for it to open, then pump messages until it closes.
    /// The caller must already hold `remote` in the pending set.
    fn handle_connection(this: &Arc<Self>, remote: PeerId, conn: Arc<dyn Connection>) {
        for peer in conn.metadata().peer_ids.clone() {
            Self::open_connection_to(this, peer);
        }

        let me = this.clone();
        let handle = tokio::spawn(async move {
            if let Err(error) = conn.ready().await {
                debug!(peer = %me.id, %remote, %error, "connection failed before opening");
                me.state.write().pending.remove(&remote);
                return;
            }
            me.on_connection_open(&remote, conn.clone());

            loop {
                match conn.recv().await {
                    Ok(msg) => Self::on_message(&me, &remote, msg),
                    Err(_) => break,
                }
            }
            me.on_connection_closed(&remote);
        });
        this.track(handle);
    }

    /// Dial `remote` in the background. A no-op for ourselves, for anyone
    /// already connected, and for anyone already being dialed.
    fn open_connection_to(this: &Arc<Self>, remote: PeerId) {
        if remote == this.id {
            return;
        }
        {
            let mut state = this.state.write();
            if state.connections.contains_key(&remote) || !state.pending.insert(remote.clone()) {
                return;
            }
        }
        let endpoint = match this.endpoint.read().clone() {
            Some(endpoint) => endpoint,
            None => {
                this.state.write().pending.remove(&remote);
                return;
            }
        };

        let me = this.clone();
        let handle = tokio::spawn(async move {
            let metadata = ConnectMetadata {
                peer_ids: me.known_peers(),
            };
            match endpoint.connect(&remote, metadata).await {
                Ok(conn) => Self::handle_connection(&me, remote, conn),
                Err(err) => {
                    let error = MeshError::from(err);
                    warn!(peer = %me.id, %remote, %error, "dial failed");
                    {
                        let mut state = me.state.write();
                        state.pending.remove(&remote);
                        state.error = Some(error);
                    }
                    me.notify();
                }
            }
        });
        this.track(handle);
    }

    /// Record a now-open connection and greet the remote with the full peer
    /// list and chat history.
    fn on_connection_open(&self, remote: &PeerId, conn: Arc<dyn Connection>) {
        {
            let mut state = self.state.write();
            state.pending.remove(remote);
            state.connections.insert(remote.clone(), conn.clone());
            let seeds = WireMessage::Seeds {
                peer_ids: state.connections.keys().cloned().collect(),
            };
            let history = WireMessage::Chat {
                lines: state.chat_log.lines().to_vec(),
            };
            // Queued under the lock: nothing can slip onto this channel
            // between the insert and the greeting.
            let _ = self.outbound.send((seeds, vec![conn.clone()]));
            let _ = self.outbound.send((history, vec![conn]));
        }
        debug!(peer = %self.id, %remote, "connection open");
        self.notify();
    }

    fn on_message(this: &Arc<Self>, from: &PeerId, msg: WireMessage) {
        match msg {
            WireMessage::Seeds { peer_ids } => {
                debug!(peer = %this.id, %from, count = peer_ids.len(), "received peer list");
                for peer in peer_ids {
                    Self::open_connection_to(this, peer);
                }
            }
            WireMessage::Chat { lines } => {
                let added = {
                    let mut state = this.state.write();
                    state.chat_log.merge(lines)
                };
                debug!(peer = %this.id, %from, added, "merged chat lines");
                this.notify();
            }
        }
    }

    fn on_connection_closed(&self, remote: &PeerId) {
        let removed = {
            let mut state = self.state.write();
            state.pending.remove(remote);
            state.connections.remove(remote).is_some()
        };
        if removed {
            debug!(peer = %self.id, %remote, "connection closed");
            self.notify();
        }
    }

    fn send_message(&self, content: &str) -> Result<(), NotReadyError> {
        {
            let mut state = self.state.write();
            if state.loading {
                return Err(NotReadyError);
            }
            let line = ChatLine::new(self.author(), content);
            state.chat_log.insert(line.clone());
            let targets: Vec<Arc<dyn Connection>> = state.connections.values().cloned().collect();
            let _ = self
                .outbound
                .send((WireMessage::Chat { lines: vec![line] }, targets));
        }
        self.notify();
        Ok(())
    }

    fn author(&self) -> &str {
        self.display_name.as_deref().unwrap_or(SEED_SENDER)
    }

    /// Identities of every open connection, for greetings and dial metadata.
    fn known_peers(&self) -> Vec<PeerId> {
        self.state.read().connections.keys().cloned().collect()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Invoke every subscriber outside the locks, so callbacks can query the
    /// peer or manage subscriptions without deadlocking.
    fn notify(&self) {
        let callbacks: Vec<UpdateCallback> =
            self.subscribers.lock().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}
