//! Control plane - host/client link over TCP
//!
//! One machine hosts, others connect as clients. Only the host mutates
//! its supervisor; client front doors serialize mutation requests onto
//! the link. Replicated events coming back are re-published on the local
//! event bus, so front-end code never cares which side it runs on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FleetConfig;
use crate::core::events::{EventBus, ServerEvent};
use crate::core::launch::LaunchSpec;
use crate::core::monitor::{SystemSampler, SystemStats};
use crate::core::supervisor::{SupervisorError, SupervisorHandle};
use crate::net::protocol::{self, ConfigSnapshot, Message};
use crate::props;

const PROPS_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("already hosting or connected")]
    AlreadyLinked,
    #[error("not connected to a host")]
    NotLinked,
    #[error("only the host can do this")]
    NotHost,
    #[error("the link dropped before the host replied")]
    LinkDropped,
    #[error("the host did not reply in time")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("properties: {0}")]
    Props(#[from] anyhow::Error),
}

/// Which end of the link this process currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Disconnected,
    Host,
    Client,
}

/// Connectivity surfaced to front-ends through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub connected: bool,
    pub is_host: bool,
}

struct Inner {
    role: PeerRole,
    /// Host side: one ordered writer per connected peer
    peers: Vec<mpsc::UnboundedSender<Message>>,
    /// Client side: the writer toward the host
    uplink: Option<mpsc::UnboundedSender<Message>>,
    /// Client side: in-flight properties requests keyed by path
    pending_props: HashMap<String, oneshot::Sender<Vec<(String, String)>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Inner {
    fn broadcast(&mut self, message: &Message) {
        self.peers.retain(|peer| peer.send(message.clone()).is_ok());
    }
}

/// Role state machine plus everything that rides the link.
pub struct ControlPlane {
    supervisor: SupervisorHandle,
    config: FleetConfig,
    inner: Arc<Mutex<Inner>>,
    link_tx: watch::Sender<LinkState>,
    stats_tx: watch::Sender<SystemStats>,
    snapshot_tx: watch::Sender<Option<ConfigSnapshot>>,
}

impl ControlPlane {
    pub fn new(supervisor: SupervisorHandle, config: FleetConfig) -> Self {
        let (link_tx, _) = watch::channel(LinkState::default());
        let (stats_tx, _) = watch::channel(SystemStats::default());
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            supervisor,
            config,
            inner: Arc::new(Mutex::new(Inner {
                role: PeerRole::Disconnected,
                peers: Vec::new(),
                uplink: None,
                pending_props: HashMap::new(),
                tasks: Vec::new(),
            })),
            link_tx,
            stats_tx,
            snapshot_tx,
        }
    }

    pub async fn role(&self) -> PeerRole {
        self.inner.lock().await.role
    }

    /// Observe connect/disconnect transitions.
    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }

    /// Latest telemetry sample, local when hosting, replicated when a
    /// client.
    pub fn system_stats(&self) -> watch::Receiver<SystemStats> {
        self.stats_tx.subscribe()
    }

    /// Last configuration snapshot pushed by the host.
    pub fn config_snapshot(&self) -> watch::Receiver<Option<ConfigSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Begin hosting on the configured control port.
    pub async fn create_host(&self) -> Result<SocketAddr, ControlError> {
        self.create_host_on(self.config.control_port).await
    }

    /// Begin hosting on the given port (0 picks an ephemeral one).
    /// Returns the bound address.
    pub async fn create_host_on(&self, port: u16) -> Result<SocketAddr, ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.role != PeerRole::Disconnected {
            return Err(ControlError::AlreadyLinked);
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;
        inner.role = PeerRole::Host;

        inner.tasks.push(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.inner),
            self.supervisor.clone(),
        )));
        inner.tasks.push(tokio::spawn(replicate_loop(
            self.supervisor.bus().clone(),
            Arc::clone(&self.inner),
        )));
        inner.tasks.push(tokio::spawn(telemetry_loop(
            self.supervisor.clone(),
            Arc::clone(&self.inner),
            self.stats_tx.clone(),
            self.config.telemetry_interval(),
        )));
        drop(inner);

        self.link_tx.send_replace(LinkState {
            connected: true,
            is_host: true,
        });
        info!(%addr, "hosting control plane");
        Ok(addr)
    }

    /// Connect to a hosting peer as a client. A bare address without a
    /// port gets the configured control port.
    pub async fn connect(&self, addr: &str) -> Result<(), ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.role != PeerRole::Disconnected {
            return Err(ControlError::AlreadyLinked);
        }

        let addr = if addr.contains(':') {
            addr.to_string()
        } else {
            format!("{addr}:{}", self.config.control_port)
        };
        let stream = TcpStream::connect(&addr).await?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        inner.role = PeerRole::Client;
        inner.uplink = Some(tx);
        inner.tasks.push(tokio::spawn(write_loop(rx, write_half)));
        inner.tasks.push(tokio::spawn(client_read_loop(
            read_half,
            Arc::clone(&self.inner),
            self.supervisor.bus().clone(),
            self.stats_tx.clone(),
            self.snapshot_tx.clone(),
            self.link_tx.clone(),
        )));
        drop(inner);

        self.link_tx.send_replace(LinkState {
            connected: true,
            is_host: false,
        });
        info!(%addr, "connected to host");
        Ok(())
    }

    /// Tear the link down. Local server processes are untouched.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        inner.peers.clear();
        inner.uplink = None;
        inner.pending_props.clear();
        let was = inner.role;
        inner.role = PeerRole::Disconnected;
        drop(inner);

        self.link_tx.send_replace(LinkState::default());
        if was != PeerRole::Disconnected {
            info!(?was, "control plane disconnected");
        }
    }

    /// Start a profile, locally when we have authority, else by asking
    /// the host.
    pub async fn start_server(&self, spec: LaunchSpec) -> Result<(), ControlError> {
        let inner = self.inner.lock().await;
        if inner.role == PeerRole::Client {
            send_uplink(&inner, Message::RequestStartServer { spec: Box::new(spec) })
        } else {
            drop(inner);
            Ok(self.supervisor.start_server(spec)?)
        }
    }

    pub async fn stop_server(&self, profile: &str) -> Result<(), ControlError> {
        let inner = self.inner.lock().await;
        if inner.role == PeerRole::Client {
            send_uplink(
                &inner,
                Message::RequestStopServer {
                    profile: profile.to_string(),
                },
            )
        } else {
            drop(inner);
            Ok(self.supervisor.stop_server(profile)?)
        }
    }

    pub async fn send_command(&self, profile: &str, command: &str) -> Result<(), ControlError> {
        let inner = self.inner.lock().await;
        if inner.role == PeerRole::Client {
            send_uplink(
                &inner,
                Message::SendRemoteCommand {
                    profile: profile.to_string(),
                    command: command.to_string(),
                },
            )
        } else {
            drop(inner);
            Ok(self.supervisor.send_command(profile, command)?)
        }
    }

    /// Read a properties file, from the host's disk when a client.
    pub async fn request_properties(
        &self,
        path: &str,
    ) -> Result<Vec<(String, String)>, ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.role != PeerRole::Client {
            drop(inner);
            return Ok(props::load(Path::new(path))?);
        }

        let (reply, rx) = oneshot::channel();
        inner.pending_props.insert(path.to_string(), reply);
        let sent = send_uplink(
            &inner,
            Message::RequestRemoteProperties {
                path: path.to_string(),
            },
        );
        drop(inner);
        sent?;

        match tokio::time::timeout(PROPS_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(props)) => Ok(props),
            Ok(Err(_)) => Err(ControlError::LinkDropped),
            Err(_) => {
                self.inner.lock().await.pending_props.remove(path);
                Err(ControlError::Timeout)
            }
        }
    }

    /// Write a properties file, on the host's disk when a client.
    pub async fn save_properties(
        &self,
        path: &str,
        props_pairs: &[(String, String)],
    ) -> Result<(), ControlError> {
        let inner = self.inner.lock().await;
        if inner.role == PeerRole::Client {
            send_uplink(
                &inner,
                Message::SaveRemoteProperties {
                    path: path.to_string(),
                    props: props_pairs.to_vec(),
                },
            )
        } else {
            drop(inner);
            Ok(props::save(Path::new(path), props_pairs)?)
        }
    }

    /// Push the full profile configuration to every connected client.
    pub async fn sync_configuration_to_all(
        &self,
        snapshot: ConfigSnapshot,
    ) -> Result<(), ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.role != PeerRole::Host {
            return Err(ControlError::NotHost);
        }
        inner.broadcast(&Message::SyncConfigurationToAll { snapshot });
        Ok(())
    }
}

fn send_uplink(inner: &Inner, message: Message) -> Result<(), ControlError> {
    match &inner.uplink {
        Some(tx) => tx.send(message).map_err(|_| ControlError::LinkDropped),
        None => Err(ControlError::NotLinked),
    }
}

/// Host side: accept clients and wire each one up.
async fn accept_loop(
    listener: TcpListener,
    inner: Arc<Mutex<Inner>>,
    supervisor: SupervisorHandle,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        info!(%peer_addr, "peer connected");

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = inner.lock().await;
            inner.peers.push(tx.clone());
            inner.tasks.push(tokio::spawn(write_loop(rx, write_half)));
            inner.tasks.push(tokio::spawn(host_read_loop(
                read_half,
                tx,
                supervisor.clone(),
            )));
        }
    }
}

/// Serialize messages from the channel onto one TCP stream in order.
async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
) {
    while let Some(message) = rx.recv().await {
        let line = match protocol::encode(&message) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "failed to encode message");
                continue;
            }
        };
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Host side: apply one client's requests to the local supervisor.
async fn host_read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    peer_tx: mpsc::UnboundedSender<Message>,
    supervisor: SupervisorHandle,
) {
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let message = match protocol::decode(&line) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping malformed message");
                continue;
            }
        };
        match message {
            Message::RequestStartServer { spec } => {
                let _ = supervisor.start_server(*spec);
            }
            Message::RequestStopServer { profile } => {
                let _ = supervisor.stop_server(&profile);
            }
            Message::SendRemoteCommand { profile, command } => {
                let _ = supervisor.send_command(&profile, &command);
            }
            Message::RequestRemoteProperties { path } => {
                let props = props::load(Path::new(&path)).unwrap_or_default();
                let _ = peer_tx.send(Message::RemotePropertiesSnapshot { path, props });
            }
            Message::SaveRemoteProperties { path, props } => {
                if let Err(err) = props::save(Path::new(&path), &props) {
                    warn!(%err, %path, "remote properties save failed");
                }
            }
            other => {
                debug!(?other, "unexpected message from client, ignored");
            }
        }
    }
    debug!("peer read loop ended");
}

/// Client side: turn replicated messages back into local events.
async fn client_read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    inner: Arc<Mutex<Inner>>,
    bus: EventBus,
    stats_tx: watch::Sender<SystemStats>,
    snapshot_tx: watch::Sender<Option<ConfigSnapshot>>,
    link_tx: watch::Sender<LinkState>,
) {
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let message = match protocol::decode(&line) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping malformed message");
                continue;
            }
        };
        match message {
            Message::ReceiveRemoteLog { profile, line, error } => {
                bus.publish(ServerEvent::Log { profile, line, error });
            }
            Message::ReceiveRemoteStatus { profile, status } => {
                bus.publish(ServerEvent::Status { profile, status });
            }
            Message::ReceiveRemotePlayerJoined { profile, player } => {
                bus.publish(ServerEvent::PlayerJoined { profile, player });
            }
            Message::ReceiveRemotePlayerLeft { profile, player } => {
                bus.publish(ServerEvent::PlayerLeft { profile, player });
            }
            Message::ReceiveRemoteSystemStats { stats } => {
                stats_tx.send_replace(stats);
            }
            Message::RemotePropertiesSnapshot { path, props } => {
                if let Some(reply) = inner.lock().await.pending_props.remove(&path) {
                    let _ = reply.send(props);
                }
            }
            Message::SyncConfigurationToAll { snapshot } => {
                snapshot_tx.send_replace(Some(snapshot));
            }
            other => {
                // Mutation requests are host-only; a client never applies
                // them to its own supervisor.
                debug!(?other, "ignoring mutation request, not host");
            }
        }
    }

    // Host went away: fall back to standalone. Dropping the pending
    // senders fails in-flight property requests right away instead of
    // letting them run out their timeout.
    let mut inner = inner.lock().await;
    inner.uplink = None;
    inner.role = PeerRole::Disconnected;
    inner.pending_props.clear();
    let tasks: Vec<JoinHandle<()>> = inner.tasks.drain(..).collect();
    drop(inner);
    link_tx.send_replace(LinkState::default());
    info!("link to host lost");
    // This loop is among the drained tasks; aborting it last is fine
    // since nothing awaits after this point.
    for task in tasks {
        task.abort();
    }
}

/// Host side: forward every replicable local event to all peers.
async fn replicate_loop(bus: EventBus, inner: Arc<Mutex<Inner>>) {
    let mut events = bus.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "replication lagged, events skipped");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        let message = match event {
            ServerEvent::Log { profile, line, error } => {
                Message::ReceiveRemoteLog { profile, line, error }
            }
            ServerEvent::Status { profile, status } => {
                Message::ReceiveRemoteStatus { profile, status }
            }
            ServerEvent::PlayerJoined { profile, player } => {
                Message::ReceiveRemotePlayerJoined { profile, player }
            }
            ServerEvent::PlayerLeft { profile, player } => {
                Message::ReceiveRemotePlayerLeft { profile, player }
            }
            // Conflict reports stay local; the host operator acts on them.
            ServerEvent::ModConflict { .. } => continue,
        };
        inner.lock().await.broadcast(&message);
    }
}

/// Host side: sample telemetry and push it out best-effort.
async fn telemetry_loop(
    supervisor: SupervisorHandle,
    inner: Arc<Mutex<Inner>>,
    stats_tx: watch::Sender<SystemStats>,
    interval: Duration,
) {
    let mut sampler = SystemSampler::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let targets = match supervisor.telemetry_targets().await {
            Ok(targets) => targets,
            Err(_) => break,
        };
        let stats = sampler.sample(&targets);
        stats_tx.send_replace(stats.clone());
        inner
            .lock()
            .await
            .broadcast(&Message::ReceiveRemoteSystemStats { stats });
    }
}
