//! Process supervisor - owns every child server and all state about them
//!
//! One tokio task owns the handle map and applies every state change in
//! arrival order. Reader and exit-waiter tasks never touch state; they
//! send messages into the loop. That single queue is what makes status
//! transitions and log ordering deterministic per profile.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, ChildStdout, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::affinity;
use crate::config::FleetConfig;
use crate::core::classifier::{self, Classified, ConflictTracker};
use crate::core::events::{EventBus, ServerEvent, ServerStatus};
use crate::core::java;
use crate::core::launch::{self, LaunchSpec};
use crate::core::modsync;
use crate::core::monitor;
use crate::platform;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor is no longer running")]
    Closed,
    #[error("no running server for profile '{0}'")]
    NotRunning(String),
}

/// Messages into the supervisor loop. Everything that mutates or reads
/// supervisor state arrives here.
enum Command {
    Start(Box<LaunchSpec>),
    Stop(String),
    Kill(String),
    Send { profile: String, line: String },
    SetAffinity { profile: String, mask: i64 },
    AcceptEula { profile: String, reply: oneshot::Sender<Result<(), SupervisorError>> },
    OnlinePlayers { profile: String, reply: oneshot::Sender<Vec<String>> },
    RunningProfiles { reply: oneshot::Sender<Vec<String>> },
    IsRunning { profile: String, reply: oneshot::Sender<bool> },
    UptimeSecs { profile: String, reply: oneshot::Sender<Option<i64>> },
    TelemetryTargets { reply: oneshot::Sender<Vec<(String, u32, u32)>> },
    // internal
    Launched { profile: String, outcome: Box<Result<SpawnedChild>> },
    Line { profile: String, line: String, error: bool },
    Exited { profile: String },
}

/// Pieces of a freshly spawned child, handed to the loop before any
/// output has been read so `Starting` always precedes the first log line.
struct SpawnedChild {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    pid: u32,
}

/// Loop-side state for one live server.
struct ServerHandle {
    pid: u32,
    /// Feeds the stdin writer task; pipe writes never run on the loop
    stdin_tx: mpsc::UnboundedSender<String>,
    kill_tx: Option<oneshot::Sender<()>>,
    status: ServerStatus,
    max_ram_mb: u32,
    players: HashSet<String>,
    conflicts: ConflictTracker,
    started_at: DateTime<Utc>,
}

/// Builds the supervisor and hands out its public handle.
pub struct Supervisor {
    config: FleetConfig,
    bus: EventBus,
}

impl Supervisor {
    pub fn new(config: FleetConfig) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self { config, bus }
    }

    /// Start the event-application loop and return the cloneable handle
    /// everything else talks through.
    pub fn spawn(self) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SupervisorHandle {
            tx: tx.clone(),
            bus: self.bus.clone(),
        };
        tokio::spawn(run_loop(self.config, self.bus, tx, rx));
        handle
    }
}

/// Cloneable front door to the supervisor loop.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Command>,
    bus: EventBus,
}

impl SupervisorHandle {
    /// Begin launching a profile. Progress and failure both surface as
    /// events; a duplicate start for a live profile is a no-op.
    pub fn start_server(&self, spec: LaunchSpec) -> Result<(), SupervisorError> {
        self.send(Command::Start(Box::new(spec)))
    }

    /// Ask a server to shut down cleanly by writing `stop` to its console.
    pub fn stop_server(&self, profile: &str) -> Result<(), SupervisorError> {
        self.send(Command::Stop(profile.to_string()))
    }

    /// Forcibly terminate a server process.
    pub fn kill_server(&self, profile: &str) -> Result<(), SupervisorError> {
        self.send(Command::Kill(profile.to_string()))
    }

    /// Write one console command to a server's stdin.
    pub fn send_command(&self, profile: &str, line: &str) -> Result<(), SupervisorError> {
        self.send(Command::Send {
            profile: profile.to_string(),
            line: line.to_string(),
        })
    }

    /// Apply the machine-derived affinity mask to a running server.
    pub fn set_smart_affinity(&self, profile: &str) -> Result<(), SupervisorError> {
        self.set_manual_affinity(profile, affinity::smart_mask())
    }

    /// Apply an explicit affinity mask. 0 is invalid and ignored; -1
    /// means no restriction.
    pub fn set_manual_affinity(&self, profile: &str, mask: i64) -> Result<(), SupervisorError> {
        self.send(Command::SetAffinity {
            profile: profile.to_string(),
            mask,
        })
    }

    /// Rewrite the profile's `eula.txt` to accepted. Works whether or not
    /// the server is currently running.
    pub async fn accept_eula(&self, profile: &str) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AcceptEula {
            profile: profile.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| SupervisorError::Closed)?
    }

    /// Players currently on the profile, per join/leave log lines.
    pub async fn online_players(&self, profile: &str) -> Result<Vec<String>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OnlinePlayers {
            profile: profile.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    pub async fn running_profiles(&self) -> Result<Vec<String>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RunningProfiles { reply })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    pub async fn is_running(&self, profile: &str) -> Result<bool, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::IsRunning {
            profile: profile.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    /// Seconds since the profile's process was spawned, if it is live.
    pub async fn uptime_secs(&self, profile: &str) -> Result<Option<i64>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UptimeSecs {
            profile: profile.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    /// `(profile, pid, ram_cap_mb)` for every live server, for telemetry.
    pub async fn telemetry_targets(&self) -> Result<Vec<(String, u32, u32)>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TelemetryTargets { reply })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    /// Subscribe to the shared event stream.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<ServerEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn send(&self, command: Command) -> Result<(), SupervisorError> {
        self.tx.send(command).map_err(|_| SupervisorError::Closed)
    }
}

async fn run_loop(
    config: FleetConfig,
    bus: EventBus,
    tx: mpsc::UnboundedSender<Command>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut handles: HashMap<String, ServerHandle> = HashMap::new();
    // Directories and caps outlive the handle so EULA handling and
    // restarts still know where the server lives.
    let mut paths: HashMap<String, PathBuf> = HashMap::new();
    let mut ram_caps: HashMap<String, u32> = HashMap::new();
    let mut launching: HashSet<String> = HashSet::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Start(spec) => {
                let profile = spec.profile.clone();
                // A handle in any state blocks a new start; exit removes
                // it before the next start is accepted, so a killed
                // server stays blocked until its process is reaped.
                if launching.contains(&profile) || handles.contains_key(&profile) {
                    debug!(%profile, "start ignored, already live");
                    continue;
                }
                launching.insert(profile.clone());
                paths.insert(profile.clone(), spec.dir.clone());
                ram_caps.insert(profile.clone(), launch::parse_ram_mb(&spec.max_ram));
                tokio::spawn(prepare_and_spawn(*spec, config.clone(), tx.clone()));
            }

            Command::Launched { profile, outcome } => {
                launching.remove(&profile);
                match *outcome {
                    Ok(spawned) => {
                        let SpawnedChild { child, stdin, stdout, stderr, pid } = spawned;
                        info!(%profile, pid, "server process spawned");

                        let (kill_tx, kill_rx) = oneshot::channel();
                        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
                        spawn_stdin_writer(profile.clone(), stdin, stdin_rx);
                        handles.insert(
                            profile.clone(),
                            ServerHandle {
                                pid,
                                stdin_tx,
                                kill_tx: Some(kill_tx),
                                status: ServerStatus::Starting,
                                max_ram_mb: ram_caps.get(&profile).copied().unwrap_or(0),
                                players: HashSet::new(),
                                conflicts: ConflictTracker::new(),
                                started_at: Utc::now(),
                            },
                        );
                        bus.publish(ServerEvent::Status {
                            profile: profile.clone(),
                            status: ServerStatus::Starting,
                        });

                        // Readers start only after Starting is published,
                        // so no log line can precede the transition.
                        spawn_reader(tx.clone(), profile.clone(), stdout, false);
                        spawn_reader(tx.clone(), profile.clone(), stderr, true);
                        spawn_exit_waiter(tx.clone(), profile, child, kill_rx);
                    }
                    Err(err) => {
                        error!(%profile, %err, "launch failed");
                        bus.publish(ServerEvent::Log {
                            profile: profile.clone(),
                            line: format!("Failed to start server: {err:#}"),
                            error: true,
                        });
                        bus.publish(ServerEvent::Status {
                            profile,
                            status: ServerStatus::Stopped,
                        });
                    }
                }
            }

            Command::Line { profile, line, error } => {
                bus.publish(ServerEvent::Log {
                    profile: profile.clone(),
                    line: line.clone(),
                    error,
                });
                let Some(handle) = handles.get_mut(&profile) else {
                    continue;
                };

                match classifier::classify(&line) {
                    Classified::StartupComplete => {
                        if handle.status == ServerStatus::Starting {
                            handle.status = ServerStatus::Running;
                            bus.publish(ServerEvent::Status {
                                profile: profile.clone(),
                                status: ServerStatus::Running,
                            });
                        }
                    }
                    Classified::PlayerJoined(player) => {
                        // A repeated join line must not double-count.
                        if handle.players.insert(player.clone()) {
                            bus.publish(ServerEvent::PlayerJoined {
                                profile: profile.clone(),
                                player,
                            });
                        }
                    }
                    Classified::PlayerLeft(player) => {
                        if handle.players.remove(&player) {
                            bus.publish(ServerEvent::PlayerLeft {
                                profile: profile.clone(),
                                player,
                            });
                        }
                    }
                    Classified::Nothing => {}
                }

                let mods_dir = paths
                    .get(&profile)
                    .map(|p| p.join("mods"))
                    .unwrap_or_default();
                if let Some((mod_names, file_names)) = handle.conflicts.observe(&line, &mods_dir) {
                    warn!(%profile, mods = ?mod_names, "mod conflict detected");
                    bus.publish(ServerEvent::ModConflict {
                        profile,
                        mod_names,
                        file_names,
                    });
                }
            }

            Command::Stop(profile) => {
                // A killed server still has a handle until its exit is
                // reaped; status must not move backwards from Killed.
                let Some(handle) = handles
                    .get_mut(&profile)
                    .filter(|h| h.status.is_active())
                else {
                    debug!(%profile, "stop ignored, not running");
                    continue;
                };
                if handle.stdin_tx.send("stop".to_string()).is_ok() {
                    handle.status = ServerStatus::Stopping;
                    bus.publish(ServerEvent::Status {
                        profile,
                        status: ServerStatus::Stopping,
                    });
                } else {
                    warn!(%profile, "stdin writer gone, stop not delivered");
                }
            }

            Command::Kill(profile) => {
                let Some(handle) = handles.get_mut(&profile) else {
                    debug!(%profile, "kill ignored, not running");
                    continue;
                };
                if let Some(kill_tx) = handle.kill_tx.take() {
                    let _ = kill_tx.send(());
                    handle.status = ServerStatus::Killed;
                    bus.publish(ServerEvent::Status {
                        profile,
                        status: ServerStatus::Killed,
                    });
                }
            }

            Command::Send { profile, line } => {
                let Some(handle) = handles
                    .get_mut(&profile)
                    .filter(|h| h.status.is_active())
                else {
                    debug!(%profile, "command ignored, not running");
                    continue;
                };
                if handle.stdin_tx.send(line.clone()).is_ok() {
                    bus.publish(ServerEvent::Log {
                        profile,
                        line: format!("> {line}"),
                        error: false,
                    });
                } else {
                    warn!(%profile, "stdin writer gone, command not delivered");
                }
            }

            Command::Exited { profile } => {
                if let Some(handle) = handles.remove(&profile) {
                    info!(%profile, pid = handle.pid, "server exited");
                }
                bus.publish(ServerEvent::Status {
                    profile: profile.clone(),
                    status: ServerStatus::Stopped,
                });
                if let Some(dir) = paths.get(&profile) {
                    if eula_declined(dir) {
                        bus.publish(ServerEvent::Log {
                            profile,
                            line: "Server stopped because eula.txt is not accepted. \
                                   Accept the EULA and start again."
                                .to_string(),
                            error: true,
                        });
                    }
                }
            }

            Command::SetAffinity { profile, mask } => {
                if mask == 0 {
                    debug!(%profile, "affinity mask 0 is invalid, ignored");
                    continue;
                }
                let Some(handle) = handles.get(&profile) else {
                    debug!(%profile, "affinity ignored, not running");
                    continue;
                };
                if let Err(err) = platform::set_affinity_mask(handle.pid, mask) {
                    warn!(%profile, %err, "affinity not applied");
                }
            }

            Command::AcceptEula { profile, reply } => {
                let result = match paths.get(&profile) {
                    Some(dir) => {
                        if let Err(err) = accept_eula_file(dir) {
                            warn!(%profile, %err, "eula rewrite failed");
                        }
                        Ok(())
                    }
                    None => Err(SupervisorError::NotRunning(profile)),
                };
                let _ = reply.send(result);
            }

            Command::OnlinePlayers { profile, reply } => {
                let players = handles
                    .get(&profile)
                    .map(|h| {
                        let mut v: Vec<String> = h.players.iter().cloned().collect();
                        v.sort_unstable();
                        v
                    })
                    .unwrap_or_default();
                let _ = reply.send(players);
            }

            Command::RunningProfiles { reply } => {
                let mut profiles: Vec<String> = handles
                    .iter()
                    .filter(|(_, h)| h.status.is_active())
                    .map(|(p, _)| p.clone())
                    .collect();
                profiles.sort_unstable();
                let _ = reply.send(profiles);
            }

            Command::IsRunning { profile, reply } => {
                let running = handles.get(&profile).is_some_and(|h| h.status.is_active());
                let _ = reply.send(running);
            }

            Command::UptimeSecs { profile, reply } => {
                let uptime = handles
                    .get(&profile)
                    .map(|h| (Utc::now() - h.started_at).num_seconds());
                let _ = reply.send(uptime);
            }

            Command::TelemetryTargets { reply } => {
                let targets = handles
                    .iter()
                    .map(|(p, h)| (p.clone(), h.pid, h.max_ram_mb))
                    .collect();
                let _ = reply.send(targets);
            }
        }
    }
}

/// Everything before the process exists: reap, sync, java, launch line,
/// spawn. Runs off the loop; the outcome is marshalled back as a message.
async fn prepare_and_spawn(
    spec: LaunchSpec,
    config: FleetConfig,
    tx: mpsc::UnboundedSender<Command>,
) {
    let profile = spec.profile.clone();
    let outcome = tokio::task::spawn_blocking(move || prepare(&spec, &config))
        .await
        .unwrap_or_else(|join_err| Err(anyhow::anyhow!("launch preparation panicked: {join_err}")));

    let outcome = match outcome {
        Ok((java, args, dir)) => spawn_child(&java, &args, &dir),
        Err(err) => Err(err),
    };
    let _ = tx.send(Command::Launched {
        profile,
        outcome: Box::new(outcome),
    });
}

fn prepare(spec: &LaunchSpec, config: &FleetConfig) -> Result<(String, Vec<String>, PathBuf)> {
    // Leftovers from a previous crash would hold file locks.
    monitor::reap_orphans(&spec.dir);

    if let Some(source) = &spec.mods_source {
        match modsync::sync_mods(source, &spec.dir) {
            Ok(summary) if summary.changed() => {
                debug!(profile = %spec.profile, ?summary, "mods synced")
            }
            Ok(_) => {}
            Err(err) => warn!(profile = %spec.profile, %err, "mod sync failed, launching anyway"),
        }
    }

    let java = resolve_java(spec);
    let mut spec = spec.clone();
    spec.max_ram = launch::normalize_ram(&spec.max_ram, config.default_ram_mb);
    spec.min_ram = launch::normalize_ram(&spec.min_ram, config.default_ram_mb.min(1024));
    let args = launch::build_launch_args(&spec)?;
    Ok((java, args, spec.dir))
}

fn resolve_java(spec: &LaunchSpec) -> String {
    if !spec.wants_auto_java() {
        return spec.java_path.trim().to_string();
    }
    let jar = if spec.is_managed_loader() {
        launch::find_loader_jar(&spec.dir).map(|name| spec.dir.join(name))
    } else {
        Some(spec.dir.join(&spec.artifact))
    };
    match jar.and_then(|j| java::detect_required_major(&j)) {
        Some(required) => java::best_java(required),
        None => "java".to_string(),
    }
}

fn spawn_child(java: &str, args: &[String], dir: &Path) -> Result<SpawnedChild> {
    let mut child = ProcessCommand::new(java)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {java} in {}", dir.display()))?;

    let stdin = child.stdin.take().context("child stdin missing")?;
    let stdout = child.stdout.take().context("child stdout missing")?;
    let stderr = child.stderr.take().context("child stderr missing")?;
    let pid = child.id().context("child pid missing")?;

    Ok(SpawnedChild {
        child,
        stdin,
        stdout,
        stderr,
        pid,
    })
}

/// Owns the child's stdin so pipe writes happen off the loop. A newline
/// is appended to every queued line.
fn spawn_stdin_writer(
    profile: String,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let mut payload = line.into_bytes();
            payload.push(b'\n');
            if let Err(err) = stdin.write_all(&payload).await {
                warn!(%profile, %err, "stdin write failed");
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    });
}

fn spawn_reader<R>(
    tx: mpsc::UnboundedSender<Command>,
    profile: String,
    stream: R,
    error: bool,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx
                .send(Command::Line {
                    profile: profile.clone(),
                    line,
                    error,
                })
                .is_err()
            {
                break;
            }
        }
    });
}

fn spawn_exit_waiter(
    tx: mpsc::UnboundedSender<Command>,
    profile: String,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                debug!(%profile, ?status, "child exited on its own");
            }
            _ = &mut kill_rx => {
                if let Err(err) = child.kill().await {
                    warn!(%profile, %err, "kill failed");
                }
                let _ = child.wait().await;
            }
        }
        let _ = tx.send(Command::Exited { profile });
    });
}

/// True when the profile's `eula.txt` exists and still says `eula=false`.
fn eula_declined(dir: &Path) -> bool {
    std::fs::read_to_string(dir.join("eula.txt"))
        .map(|text| text.replace(' ', "").to_lowercase().contains("eula=false"))
        .unwrap_or(false)
}

fn accept_eula_file(dir: &Path) -> Result<()> {
    let path = dir.join("eula.txt");
    let text = match std::fs::read_to_string(&path) {
        Ok(existing) if existing.to_lowercase().contains("eula=") => existing
            .lines()
            .map(|l| {
                if l.trim_start().to_lowercase().starts_with("eula=") {
                    "eula=true".to_string()
                } else {
                    l.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
            + "\n",
        _ => "eula=true\n".to_string(),
    };
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::ServerEvent;
    use tokio::time::{timeout, Duration};

    async fn next_event(
        rx: &mut tokio::sync::broadcast::Receiver<ServerEvent>,
    ) -> ServerEvent {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event within timeout")
            .expect("bus open")
    }

    fn handle() -> SupervisorHandle {
        Supervisor::new(FleetConfig::default()).spawn()
    }

    #[test]
    fn eula_rewrite_and_check() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("eula.txt"), "#comment\neula=false\n").unwrap();
        assert!(eula_declined(tmp.path()));

        accept_eula_file(tmp.path()).unwrap();
        assert!(!eula_declined(tmp.path()));
        let text = std::fs::read_to_string(tmp.path().join("eula.txt")).unwrap();
        assert!(text.contains("#comment"));
        assert!(text.contains("eula=true"));
    }

    #[test]
    fn eula_file_created_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        accept_eula_file(tmp.path()).unwrap();
        let text = std::fs::read_to_string(tmp.path().join("eula.txt")).unwrap();
        assert_eq!(text, "eula=true\n");
    }

    #[tokio::test]
    async fn queries_on_empty_supervisor() {
        let sup = handle();
        assert!(sup.running_profiles().await.unwrap().is_empty());
        assert!(!sup.is_running("nope").await.unwrap());
        assert!(sup.online_players("nope").await.unwrap().is_empty());
        assert_eq!(sup.uptime_secs("nope").await.unwrap(), None);
        assert!(sup.telemetry_targets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_for_unknown_profile_is_a_noop() {
        let sup = handle();
        sup.stop_server("ghost").unwrap();
        sup.kill_server("ghost").unwrap();
        sup.send_command("ghost", "say hi").unwrap();
        // Loop still alive and responsive afterwards.
        assert!(!sup.is_running("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn failed_spawn_emits_error_log_then_stopped() {
        let sup = handle();
        let mut events = sup.events();

        let tmp = tempfile::tempdir().unwrap();
        let mut spec = LaunchSpec::new("broken", tmp.path(), "server.jar");
        spec.java_path = "/definitely/not/a/java".into();
        sup.start_server(spec).unwrap();

        let first = next_event(&mut events).await;
        match first {
            ServerEvent::Log { profile, error, .. } => {
                assert_eq!(profile, "broken");
                assert!(error);
            }
            other => panic!("expected error log, got {other:?}"),
        }
        match next_event(&mut events).await {
            ServerEvent::Status { profile, status } => {
                assert_eq!(profile, "broken");
                assert_eq!(status, ServerStatus::Stopped);
            }
            other => panic!("expected stopped status, got {other:?}"),
        }
        assert!(!sup.is_running("broken").await.unwrap());
    }

    // A tiny shell script stands in for a server: echoes a boot banner,
    // then lines from stdin, and exits on "stop".
    #[cfg(unix)]
    fn fake_server(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("fake-server.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo '[00:00:00] [Server thread/INFO]: Done (1.0s)! For help, type help'\n\
             while read line; do\n\
               if [ \"$line\" = \"stop\" ]; then\n\
                 echo '[00:00:01] [Server thread/INFO]: Stopping server'\n\
                 exit 0\n\
               fi\n\
               echo \"echo:$line\"\n\
             done\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn full_lifecycle_with_fake_server() {
        let tmp = tempfile::tempdir().unwrap();
        let script = fake_server(tmp.path());

        let sup = handle();
        let mut events = sup.events();

        let mut spec = LaunchSpec::new("alpha", tmp.path(), "ignored.jar");
        spec.java_path = script;
        // The script ignores JVM-style flags, they just become argv noise.
        sup.start_server(spec).unwrap();

        match next_event(&mut events).await {
            ServerEvent::Status { status, .. } => assert_eq!(status, ServerStatus::Starting),
            other => panic!("expected starting, got {other:?}"),
        }

        // The Done banner flips the profile to Running.
        loop {
            match next_event(&mut events).await {
                ServerEvent::Status { status, .. } => {
                    assert_eq!(status, ServerStatus::Running);
                    break;
                }
                ServerEvent::Log { .. } => continue,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(sup.is_running("alpha").await.unwrap());
        assert!(sup.uptime_secs("alpha").await.unwrap().is_some());

        // Console round trip: echoed command line, then the script's reply.
        sup.send_command("alpha", "say hello").unwrap();
        let mut saw_echo = false;
        let mut saw_reply = false;
        while !(saw_echo && saw_reply) {
            if let ServerEvent::Log { line, .. } = next_event(&mut events).await {
                saw_echo |= line == "> say hello";
                saw_reply |= line == "echo:say hello";
            }
        }

        sup.stop_server("alpha").unwrap();
        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Stopping {
                    break;
                }
            }
        }
        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Stopped {
                    break;
                }
            }
        }
        assert!(!sup.is_running("alpha").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn duplicate_start_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let script = fake_server(tmp.path());

        let sup = handle();
        let mut events = sup.events();

        let mut spec = LaunchSpec::new("alpha", tmp.path(), "ignored.jar");
        spec.java_path = script;
        sup.start_server(spec.clone()).unwrap();

        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Running {
                    break;
                }
            }
        }

        sup.start_server(spec).unwrap();
        // Only one live profile, no second Starting transition queued.
        assert_eq!(sup.running_profiles().await.unwrap(), vec!["alpha"]);
        sup.kill_server("alpha").unwrap();
        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Killed {
                    break;
                }
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_after_kill_does_not_regress_status() {
        let tmp = tempfile::tempdir().unwrap();
        let script = fake_server(tmp.path());

        let sup = handle();
        let mut events = sup.events();
        let mut spec = LaunchSpec::new("alpha", tmp.path(), "ignored.jar");
        spec.java_path = script;
        sup.start_server(spec).unwrap();

        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Running {
                    break;
                }
            }
        }

        // Kill, stop, and a console command queued back to back; the
        // stop and the command land on the already-Killed handle and
        // must do nothing.
        sup.kill_server("alpha").unwrap();
        sup.stop_server("alpha").unwrap();
        sup.send_command("alpha", "say too late").unwrap();

        let mut statuses = Vec::new();
        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                statuses.push(status);
                if status == ServerStatus::Stopped {
                    break;
                }
            }
        }
        assert_eq!(statuses, vec![ServerStatus::Killed, ServerStatus::Stopped]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_is_blocked_until_killed_server_exits() {
        let tmp = tempfile::tempdir().unwrap();
        let script = fake_server(tmp.path());

        let sup = handle();
        let mut events = sup.events();
        let mut spec = LaunchSpec::new("alpha", tmp.path(), "ignored.jar");
        spec.java_path = script;
        sup.start_server(spec.clone()).unwrap();

        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Running {
                    break;
                }
            }
        }

        // The handle is still present between Kill and the exit
        // notification, so the queued restart must be ignored.
        sup.kill_server("alpha").unwrap();
        sup.start_server(spec).unwrap();

        let mut statuses = Vec::new();
        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                statuses.push(status);
                if status == ServerStatus::Stopped {
                    break;
                }
            }
        }
        assert_eq!(statuses, vec![ServerStatus::Killed, ServerStatus::Stopped]);
        assert!(!sup.is_running("alpha").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_and_all_masks_leave_a_running_server_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let script = fake_server(tmp.path());

        let sup = handle();
        let mut events = sup.events();
        let mut spec = LaunchSpec::new("alpha", tmp.path(), "ignored.jar");
        spec.java_path = script;
        sup.start_server(spec).unwrap();

        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Running {
                    break;
                }
            }
        }

        // Mask 0 is invalid and -1 means no restriction; both are no-ops
        // that leave the process untouched.
        sup.set_manual_affinity("alpha", 0).unwrap();
        sup.set_manual_affinity("alpha", -1).unwrap();
        assert!(sup.is_running("alpha").await.unwrap());

        sup.send_command("alpha", "ping").unwrap();
        loop {
            if let ServerEvent::Log { line, .. } = next_event(&mut events).await {
                if line == "echo:ping" {
                    break;
                }
            }
        }

        sup.kill_server("alpha").unwrap();
        loop {
            if let ServerEvent::Status { status, .. } = next_event(&mut events).await {
                if status == ServerStatus::Stopped {
                    break;
                }
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn player_join_and_leave_update_roster() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("players.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo '[0:0:0] [Server thread/INFO]: Done (1s)!'\n\
             echo '[0:0:1] [Server thread/INFO]: Steve joined the game'\n\
             echo '[0:0:1] [Server thread/INFO]: Steve joined the game'\n\
             echo '[0:0:2] [Server thread/INFO]: Alex joined the game'\n\
             echo '[0:0:3] [Server thread/INFO]: Steve left the game'\n\
             read line\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let sup = handle();
        let mut events = sup.events();
        let mut spec = LaunchSpec::new("alpha", tmp.path(), "ignored.jar");
        spec.java_path = script.to_string_lossy().into_owned();
        sup.start_server(spec).unwrap();

        let mut joins = 0;
        loop {
            match next_event(&mut events).await {
                ServerEvent::PlayerJoined { .. } => joins += 1,
                ServerEvent::PlayerLeft { player, .. } => {
                    assert_eq!(player, "Steve");
                    break;
                }
                _ => {}
            }
        }
        // The duplicate Steve join line emits nothing the second time.
        assert_eq!(joins, 2);
        assert_eq!(sup.online_players("alpha").await.unwrap(), vec!["Alex"]);
        sup.kill_server("alpha").unwrap();
    }
}
