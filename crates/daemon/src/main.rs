//! vdesk Daemon
//!
//! Main daemon process for the vdesk virtual desktop manager.
//!
//! Responsibilities:
//! - Own the desktop manager on a single thread
//! - Reconcile with the live window list on a fixed tick
//! - Handle IPC commands from the CLI
//! - Store desktops at shutdown and recreate them at the next start

mod config;

use anyhow::{Context, Result};
use config::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vdesk_core::{
    Desktop, DesktopError, DesktopEvent, DesktopManager, IgnoreAll, PersistenceRegistry, Session,
    WindowManager, WindowPolicy, WorkspaceId,
};
use vdesk_ipc::{encode_line, DesktopInfo, IpcCommand, IpcResponse, MAX_IPC_MESSAGE_SIZE};

/// Events that the daemon event loop processes.
enum DaemonEvent {
    /// An IPC command from a CLI client.
    IpcCommand {
        cmd: IpcCommand,
        responder: oneshot::Sender<IpcResponse>,
    },
    /// An event published by the desktop manager.
    Desktop(DesktopEvent),
    /// Reconcile with the live window list.
    RefreshTick,
    /// Shutdown signal.
    Shutdown,
}

/// IPC read timeout - clients must send within this period.
const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback response when a response cannot be serialized.
const SERIALIZATION_ERROR_LINE: &str =
    "{\"status\":\"error\",\"message\":\"Internal serialization error\"}\n";

/// Desktops stored at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionFile {
    /// Timestamp when the sessions were saved.
    saved_at: String,
    /// Every desktop except the startup one, in creation order.
    sessions: Vec<Session>,
}

/// Daemon state, owned by the event loop.
struct AppState {
    manager: DesktopManager,
    wm: Arc<dyn WindowManager>,
    /// User configuration.
    config: Config,
    /// Event stream of a freshly built manager, not yet forwarded.
    pending_events: Option<std::sync::mpsc::Receiver<DesktopEvent>>,
    /// Daemon start time for uptime reporting.
    start_time: std::time::Instant,
}

impl AppState {
    /// Create state with a manager whose startup desktop holds every window
    /// the configured policy manages.
    fn new_with_config(config: Config, wm: Arc<dyn WindowManager>) -> Result<Self> {
        let manager = Self::build_manager(&config, Arc::clone(&wm))?;
        let pending_events = Some(manager.subscribe());
        Ok(Self {
            manager,
            wm,
            config,
            pending_events,
            start_time: std::time::Instant::now(),
        })
    }

    fn build_policy(config: &Config, wm: &dyn WindowManager) -> Result<WindowPolicy> {
        WindowPolicy::new(&config.policy_config(), wm.current_process_id())
            .context("Failed to compile window policy")
    }

    fn build_manager(config: &Config, wm: Arc<dyn WindowManager>) -> Result<DesktopManager> {
        let policy = Self::build_policy(config, wm.as_ref())?;
        let mut manager = DesktopManager::new(
            wm,
            policy,
            PersistenceRegistry::new(),
            config.desktop_options(),
        )?;
        if config.behavior.auto_ignore_unresponsive {
            manager.set_unresponsive_handler(IgnoreAll);
        }
        Ok(manager)
    }

    /// A rejected argument closes the manager; start a fresh one so the
    /// daemon keeps serving.
    fn recover_if_closed(&mut self) {
        if !self.manager.is_closed() {
            return;
        }
        warn!("Desktop manager closed after a rejected command, starting a fresh one");
        match Self::build_manager(&self.config, Arc::clone(&self.wm)) {
            Ok(manager) => {
                self.pending_events = Some(manager.subscribe());
                self.manager = manager;
            }
            Err(e) => error!("Failed to restart desktop manager: {:#}", e),
        }
    }

    /// Apply a reloaded configuration to the running manager.
    fn apply_config(&mut self, config: Config) -> Result<()> {
        let policy = Self::build_policy(&config, self.wm.as_ref())?;
        self.manager.set_policy(policy);
        if config.behavior.auto_ignore_unresponsive {
            self.manager.set_unresponsive_handler(IgnoreAll);
        } else {
            self.manager.clear_unresponsive_handler();
        }
        if config.timing.reposition_timeout_ms != self.config.timing.reposition_timeout_ms
            || config.timing.suspend_poll_interval_ms != self.config.timing.suspend_poll_interval_ms
        {
            info!("Timing changes take effect after a restart");
        }
        self.config = config;
        info!("Configuration applied");
        Ok(())
    }

    fn desktop_info(desktop: &Desktop) -> DesktopInfo {
        DesktopInfo {
            id: desktop.id().0,
            name: desktop.name().to_string(),
            windows: desktop.len(),
            visible: desktop.is_visible(),
            suspended: desktop.is_suspended(),
            applications: desktop.persisted_applications().len(),
        }
    }

    /// Execute one command against the manager.
    fn handle_command(&mut self, cmd: IpcCommand) -> IpcResponse {
        let response = self.execute(cmd).unwrap_or_else(error_response);
        self.recover_if_closed();
        response
    }

    fn execute(&mut self, cmd: IpcCommand) -> Result<IpcResponse, DesktopError> {
        let response = match cmd {
            IpcCommand::ListDesktops => IpcResponse::Desktops {
                current: self.manager.current().0,
                startup: self.manager.startup().0,
                desktops: self.manager.desktops().map(Self::desktop_info).collect(),
            },
            IpcCommand::CreateDesktop { name } => {
                let id = self.manager.create_desktop(name)?;
                info!(desktop = %id, "Created desktop");
                IpcResponse::DesktopCreated { desktop: id.0 }
            }
            IpcCommand::SwitchDesktop { desktop } => {
                self.manager.switch_to(WorkspaceId(desktop))?;
                IpcResponse::Ok
            }
            IpcCommand::MergeDesktops { from, into } => {
                self.manager.merge(WorkspaceId(from), WorkspaceId(into))?;
                IpcResponse::Ok
            }
            IpcCommand::RenameDesktop { desktop, name } => {
                self.manager.rename_desktop(WorkspaceId(desktop), name)?;
                IpcResponse::Ok
            }
            IpcCommand::CutWindow { window } => {
                let Some(window) = window.or_else(|| self.wm.foreground_window()) else {
                    return Ok(IpcResponse::error("No window given and no foreground window"));
                };
                IpcResponse::Windows {
                    windows: self.manager.cut_window(window)?,
                }
            }
            IpcCommand::PasteWindows => IpcResponse::Windows {
                windows: self.manager.paste_windows()?,
            },
            IpcCommand::MoveWindow { window, desktop } => {
                let Some(window) = window.or_else(|| self.wm.foreground_window()) else {
                    return Ok(IpcResponse::error("No window given and no foreground window"));
                };
                IpcResponse::Windows {
                    windows: self.manager.move_window(window, WorkspaceId(desktop))?,
                }
            }
            IpcCommand::SuspendDesktop { desktop } => {
                let report = self.manager.suspend_desktop(WorkspaceId(desktop))?;
                IpcResponse::Suspended {
                    desktop,
                    persisted: report.persisted,
                    released: report.released,
                }
            }
            IpcCommand::ResumeDesktop { desktop } => {
                self.manager.resume_desktop(WorkspaceId(desktop))?;
                IpcResponse::Ok
            }
            IpcCommand::IgnoreWindows { desktop, windows } => {
                let count = self.manager.ignore_windows(WorkspaceId(desktop), &windows)?;
                debug!(desktop, count, "Ignored windows on request");
                IpcResponse::Ok
            }
            IpcCommand::QueryClipboard => IpcResponse::Windows {
                windows: self.manager.clipboard().windows().to_vec(),
            },
            IpcCommand::StoreSession { desktop } => {
                let session = self.manager.store(WorkspaceId(desktop))?;
                match serde_json::to_value(&session) {
                    Ok(session) => IpcResponse::Session { session },
                    Err(e) => IpcResponse::error(format!("Failed to serialize session: {}", e)),
                }
            }
            IpcCommand::Refresh => {
                let report = self.manager.update_windows()?;
                IpcResponse::Refreshed {
                    added: report.added,
                    dropped: report.dropped,
                }
            }
            IpcCommand::Reload => match Config::load() {
                Ok(mut config) => {
                    for w in config.validate() {
                        warn!("Config: {} - {}", w.field, w.message);
                    }
                    match self.apply_config(config) {
                        Ok(()) => IpcResponse::Ok,
                        Err(e) => IpcResponse::error(format!("{:#}", e)),
                    }
                }
                Err(e) => IpcResponse::error(format!("Failed to reload config: {:#}", e)),
            },
            IpcCommand::Stop => IpcResponse::Ok,
        };
        Ok(response)
    }

    /// Store every desktop except the startup one.
    fn collect_sessions(&mut self) -> Vec<Session> {
        let startup = self.manager.startup();
        let ids: Vec<WorkspaceId> = self
            .manager
            .desktops()
            .map(Desktop::id)
            .filter(|id| *id != startup)
            .collect();

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.manager.store(id) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(desktop = %id, "Failed to store desktop: {}", e),
            }
        }
        sessions
    }

    /// Save stored desktops to disk.
    fn save_sessions(&mut self, path: &Path) -> Result<usize> {
        let saved_at = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => format!("{}", d.as_secs()),
            Err(_) => "0".to_string(),
        };
        let file = SessionFile {
            saved_at,
            sessions: self.collect_sessions(),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write sessions: {}", path.display()))?;
        info!("Saved {} desktop(s) to {:?}", file.sessions.len(), path);
        Ok(file.sessions.len())
    }

    /// Load stored desktops from disk.
    fn load_sessions(path: &Path) -> Option<SessionFile> {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Failed to parse saved sessions: {}", e);
                    None
                }
            },
            Err(_) => None,
        }
    }

    /// Recreate stored desktops. A session that cannot be restored is skipped.
    fn restore_sessions(&mut self, file: SessionFile) -> usize {
        let mut restored = 0;
        for session in file.sessions {
            let name = session.name.clone();
            match self.manager.create_desktop_from_session(session) {
                Ok(id) => {
                    debug!(desktop = %id, "Restored desktop '{}'", name);
                    restored += 1;
                }
                Err(e @ DesktopError::Unresponsive(_)) => {
                    warn!("Restored desktop '{}' with hung windows: {}", name, e);
                    restored += 1;
                }
                Err(e) => {
                    warn!("Skipping stored desktop '{}': {}", name, e);
                    self.recover_if_closed();
                }
            }
        }
        restored
    }

    /// Restore every window and stop managing them.
    fn shutdown(&mut self) {
        if let Err(e) = self.manager.close() {
            warn!("Failed to restore all windows: {}", e);
        }
        info!(
            "Desktop manager closed after {}s",
            self.start_time.elapsed().as_secs()
        );
    }
}

/// Map a manager error onto the wire.
fn error_response(e: DesktopError) -> IpcResponse {
    match e {
        DesktopError::Unresponsive(fault) => IpcResponse::Unresponsive {
            desktop: fault.desktop.0,
            windows: fault.windows,
        },
        other => IpcResponse::error(other.to_string()),
    }
}

fn log_desktop_event(event: &DesktopEvent) {
    match event {
        DesktopEvent::UnresponsiveWindows(fault) => {
            warn!(desktop = %fault.desktop, windows = ?fault.windows, "{}", fault);
        }
        DesktopEvent::DesktopSuspended { desktop } => {
            info!(%desktop, "Desktop suspended");
        }
    }
}

/// The platform's window manager. Hosts without Win32 run headless.
fn native_window_manager(config: &Config) -> Arc<dyn WindowManager> {
    #[cfg(windows)]
    {
        Arc::new(vdesk_platform_win32::Win32WindowManager::new(
            config.platform_config(),
        ))
    }
    #[cfg(not(windows))]
    {
        warn!(
            "No native window manager on this platform, running headless (timeout {:?} unused)",
            config.platform_config().reposition_timeout
        );
        Arc::new(vdesk_core::headless::HeadlessWindowManager::new())
    }
}

/// Run the IPC server, accepting connections and dispatching commands.
#[cfg(windows)]
async fn run_ipc_server(event_tx: mpsc::Sender<DaemonEvent>) {
    use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};
    use vdesk_ipc::PIPE_NAME;

    let mut is_first_instance = true;

    loop {
        // Create a new pipe server instance
        let server = match ServerOptions::new()
            .first_pipe_instance(is_first_instance)
            .pipe_mode(PipeMode::Byte)
            .create(PIPE_NAME)
        {
            Ok(s) => {
                is_first_instance = false; // Subsequent instances don't need this flag
                s
            }
            Err(e) => {
                error!("Failed to create named pipe server: {}", e);
                if is_first_instance {
                    error!("Is another vdesk daemon already running?");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        debug!("Waiting for client connection on {}", PIPE_NAME);

        // Wait for a client to connect
        if let Err(e) = server.connect().await {
            error!("Failed to accept client connection: {}", e);
            continue;
        }

        debug!("Client connected");

        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(server, event_tx).await {
                warn!("Client handler error: {}", e);
            }
        });
    }
}

/// Run the IPC server on a Unix domain socket.
#[cfg(unix)]
async fn run_ipc_server(event_tx: mpsc::Sender<DaemonEvent>) {
    let path = vdesk_ipc::socket_path();
    // A stale socket from a crashed daemon blocks bind.
    let _ = std::fs::remove_file(&path);

    let listener = match tokio::net::UnixListener::bind(&path) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind IPC socket {}: {}", path.display(), e);
            return;
        }
    };

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                debug!("Client connected");
                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, event_tx).await {
                        warn!("Client handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept client connection: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(not(any(windows, unix)))]
async fn run_ipc_server(_event_tx: mpsc::Sender<DaemonEvent>) {
    error!("No IPC transport on this platform");
}

fn response_line(response: &IpcResponse) -> String {
    encode_line(response).unwrap_or_else(|e| {
        warn!("Failed to serialize IPC response: {}", e);
        SERIALIZATION_ERROR_LINE.to_string()
    })
}

/// Handle a single client connection.
async fn handle_client<S>(stream: S, event_tx: mpsc::Sender<DaemonEvent>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let limited_reader = reader.take(MAX_IPC_MESSAGE_SIZE as u64);
    let mut reader = BufReader::new(limited_reader);
    let mut line = String::new();

    // Read command (single line of JSON) with timeout and size bound
    let read_result = tokio::time::timeout(IPC_READ_TIMEOUT, reader.read_line(&mut line)).await;
    let bytes_read = match read_result {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            // Timeout: client did not send in time, silently close
            return Ok(());
        }
    };
    if bytes_read == 0 {
        return Ok(()); // Client disconnected
    }

    debug!("Received command: {}", line.trim());

    let cmd: IpcCommand = match vdesk_ipc::decode_line(&line) {
        Ok(cmd) => cmd,
        Err(e) => {
            let response = IpcResponse::error(format!("Invalid command: {}", e));
            writer.write_all(response_line(&response).as_bytes()).await?;
            return Ok(());
        }
    };

    let is_stop = matches!(cmd, IpcCommand::Stop);
    let (resp_tx, resp_rx) = oneshot::channel();

    if event_tx
        .send(DaemonEvent::IpcCommand {
            cmd,
            responder: resp_tx,
        })
        .await
        .is_err()
    {
        let response = IpcResponse::error("Daemon is shutting down");
        writer.write_all(response_line(&response).as_bytes()).await?;
        return Ok(());
    }

    let response = match resp_rx.await {
        Ok(resp) => resp,
        Err(_) => IpcResponse::error("Failed to get response from daemon"),
    };
    writer.write_all(response_line(&response).as_bytes()).await?;

    // If this was a stop command, signal shutdown
    if is_stop {
        let _ = event_tx.send(DaemonEvent::Shutdown).await;
    }

    Ok(())
}

/// Spawn a named forwarding thread that receives events from a std::sync::mpsc channel
/// and forwards them to a tokio mpsc sender. Returns the JoinHandle for graceful shutdown.
fn spawn_forwarding_thread<T: Send + 'static>(
    name: &str,
    receiver: std::sync::mpsc::Receiver<T>,
    sender: mpsc::Sender<DaemonEvent>,
    map_fn: impl Fn(T) -> DaemonEvent + Send + 'static,
) -> Result<std::thread::JoinHandle<()>> {
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            while let Ok(event) = receiver.recv() {
                if sender.blocking_send(map_fn(event)).is_err() {
                    break; // Channel closed, daemon shutting down
                }
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to spawn {} thread: {}", thread_name, e))
}

/// Start the reconciliation tick.
fn start_refresh_timer(
    refresh_tx: mpsc::Sender<DaemonEvent>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if refresh_tx.send(DaemonEvent::RefreshTick).await.is_err() {
                break; // Channel closed
            }
        }
    })
}

/// Check if another daemon instance is already running by probing the IPC endpoint.
#[cfg(windows)]
async fn check_already_running() -> bool {
    tokio::net::windows::named_pipe::ClientOptions::new()
        .open(vdesk_ipc::PIPE_NAME)
        .is_ok()
}

#[cfg(unix)]
async fn check_already_running() -> bool {
    tokio::net::UnixStream::connect(vdesk_ipc::socket_path())
        .await
        .is_ok()
}

#[cfg(not(any(windows, unix)))]
async fn check_already_running() -> bool {
    false
}

fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // default fallback for invalid values
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (needed for log level)
    let mut config = Config::load().unwrap_or_else(|e| {
        // Can't use tracing yet, fall back to eprintln
        eprintln!("Failed to load configuration: {}. Using defaults.", e);
        Config::default()
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_log_level(&config.behavior.log_level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Validate and clamp config values
    for w in config.validate() {
        warn!("Config: {} - {}", w.field, w.message);
    }

    info!("vdesk daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if check_already_running().await {
        error!("Another vdesk daemon instance is already running");
        return Ok(());
    }

    info!(
        "Configuration loaded: refresh_interval={}ms, reposition_timeout={}ms, {} deny pattern(s), {} process rule(s), log_level={}",
        config.behavior.refresh_interval_ms,
        config.timing.reposition_timeout_ms,
        config.deny.len(),
        config.processes.len(),
        config.behavior.log_level
    );

    let wm = native_window_manager(&config);
    let mut state = AppState::new_with_config(config.clone(), wm)?;
    info!(
        "Startup desktop holds {} window(s)",
        state
            .manager
            .desktop(state.manager.startup())
            .map_or(0, Desktop::len)
    );

    let sessions_path = config::sessions_path();
    if config.behavior.restore_sessions {
        if let Some(file) = AppState::load_sessions(&sessions_path) {
            let restored = state.restore_sessions(file);
            info!("Restored {} desktop(s) from previous session", restored);
        }
    }

    // Create event channel
    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(100);

    // Collect forwarding thread handles for graceful shutdown
    let mut thread_handles: Vec<std::thread::JoinHandle<()>> = Vec::new();
    let forward_desktop_events = |state: &mut AppState, handles: &mut Vec<_>| {
        if let Some(receiver) = state.pending_events.take() {
            match spawn_forwarding_thread(
                "desktop-events-fwd",
                receiver,
                event_tx.clone(),
                DaemonEvent::Desktop,
            ) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("{}", e),
            }
        }
    };
    forward_desktop_events(&mut state, &mut thread_handles);

    // Spawn IPC server
    let ipc_tx = event_tx.clone();
    let ipc_server = tokio::spawn(async move {
        run_ipc_server(ipc_tx).await;
    });

    // Install Ctrl+C handler so terminal kill triggers graceful shutdown
    {
        let shutdown_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Ctrl+C received, initiating shutdown...");
                let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    let mut refresh_period = state.config.refresh_interval();
    let mut refresh_timer = start_refresh_timer(event_tx.clone(), refresh_period);

    info!("Ready. Use vdesk-cli to send commands.");

    // Main event loop
    while let Some(event) = event_rx.recv().await {
        match event {
            DaemonEvent::IpcCommand { cmd, responder } => {
                debug!("Executing {:?}", cmd);
                let response = state.handle_command(cmd);
                if let IpcResponse::Error { message } = &response {
                    warn!("Command failed: {}", message);
                }

                // Log if client disconnected before receiving response
                if responder.send(response).is_err() {
                    debug!("Client disconnected before receiving IPC response");
                }

                // A rebuilt manager publishes on a new stream
                forward_desktop_events(&mut state, &mut thread_handles);

                let period = state.config.refresh_interval();
                if period != refresh_period {
                    refresh_timer.abort();
                    refresh_timer = start_refresh_timer(event_tx.clone(), period);
                    refresh_period = period;
                    info!("Refresh interval changed to {:?}", period);
                }
            }
            DaemonEvent::Desktop(event) => log_desktop_event(&event),
            DaemonEvent::RefreshTick => {
                if let Err(e) = state.manager.update_windows() {
                    warn!("Window reconciliation failed: {}", e);
                    state.recover_if_closed();
                    forward_desktop_events(&mut state, &mut thread_handles);
                }
            }
            DaemonEvent::Shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    refresh_timer.abort();
    ipc_server.abort();
    drop(event_rx);

    // Store desktops, then make every window visible again before exiting
    if let Err(e) = state.save_sessions(&sessions_path) {
        warn!("Failed to save desktops: {:#}", e);
    }
    state.shutdown();
    drop(state);

    #[cfg(unix)]
    {
        let _ = std::fs::remove_file(vdesk_ipc::socket_path());
    }

    // Join forwarding threads once every event stream has closed
    info!("Waiting for forwarding threads to exit...");
    for handle in thread_handles {
        let _ = handle.join();
    }

    info!("vdesk daemon shutting down.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdesk_core::headless::HeadlessWindowManager;

    const OWN_PID: u32 = 1;

    /// Startup desktop with windows 1, 2 and 3, window 3 on top.
    fn test_state() -> (Arc<HeadlessWindowManager>, AppState) {
        let wm = Arc::new(HeadlessWindowManager::with_process_id(OWN_PID));
        wm.open_window(1, "A", "a", None);
        wm.open_window(2, "B", "b", None);
        wm.open_window(3, "C", "c", None);
        let state = AppState::new_with_config(Config::default(), wm.clone()).unwrap();
        (wm, state)
    }

    fn create(state: &mut AppState, name: &str) -> u32 {
        match state.handle_command(IpcCommand::CreateDesktop {
            name: Some(name.into()),
        }) {
            IpcResponse::DesktopCreated { desktop } => desktop,
            other => panic!("Expected DesktopCreated, got {:?}", other),
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vdesk-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_app_state_new() {
        let (_wm, state) = test_state();
        let startup = state.manager.desktop(state.manager.startup()).unwrap();
        assert_eq!(startup.windows(), &[3, 2, 1]);
        assert!(state.pending_events.is_some());
    }

    #[test]
    fn test_list_desktops() {
        let (_wm, mut state) = test_state();
        let mail = create(&mut state, "Mail");

        let IpcResponse::Desktops {
            current,
            startup,
            desktops,
        } = state.handle_command(IpcCommand::ListDesktops)
        else {
            panic!("Expected Desktops response");
        };

        assert_eq!(current, startup);
        assert_eq!(desktops.len(), 2);
        assert_eq!(desktops[0].name, "Desktop 1");
        assert_eq!(desktops[0].windows, 3);
        assert!(desktops[0].visible);
        assert_eq!(desktops[1].id, mail);
        assert_eq!(desktops[1].name, "Mail");
        assert!(!desktops[1].visible);
    }

    #[test]
    fn test_cut_foreground_window_and_paste() {
        let (wm, mut state) = test_state();
        assert!(wm.set_foreground(2));
        let mail = create(&mut state, "Mail");

        let cut = state.handle_command(IpcCommand::CutWindow { window: None });
        assert_eq!(cut, IpcResponse::Windows { windows: vec![2] });
        assert_eq!(
            state.handle_command(IpcCommand::QueryClipboard),
            IpcResponse::Windows { windows: vec![2] }
        );

        assert_eq!(
            state.handle_command(IpcCommand::SwitchDesktop { desktop: mail }),
            IpcResponse::Ok
        );
        let pasted = state.handle_command(IpcCommand::PasteWindows);
        assert_eq!(pasted, IpcResponse::Windows { windows: vec![2] });
        assert_eq!(wm.visible_windows(), vec![2]);
    }

    #[test]
    fn test_move_window_to_desktop() {
        let (wm, mut state) = test_state();
        let mail = create(&mut state, "Mail");

        let moved = state.handle_command(IpcCommand::MoveWindow {
            window: Some(1),
            desktop: mail,
        });

        assert_eq!(moved, IpcResponse::Windows { windows: vec![1] });
        assert!(!wm.is_visible(1));
        assert!(state
            .manager
            .desktop(WorkspaceId(mail))
            .unwrap()
            .contains(1));
    }

    #[test]
    fn test_unresponsive_window_response_and_ignore() {
        let (wm, mut state) = test_state();
        let mail = create(&mut state, "Mail");
        let startup = state.manager.startup().0;
        wm.set_hung(2, true);

        let response = state.handle_command(IpcCommand::SwitchDesktop { desktop: mail });
        assert_eq!(
            response,
            IpcResponse::Unresponsive {
                desktop: startup,
                windows: vec![2]
            }
        );
        assert_eq!(state.manager.current(), WorkspaceId(mail));

        let ignored = state.handle_command(IpcCommand::IgnoreWindows {
            desktop: startup,
            windows: vec![2],
        });
        assert_eq!(ignored, IpcResponse::Ok);
        assert_eq!(
            state.handle_command(IpcCommand::SwitchDesktop { desktop: startup }),
            IpcResponse::Ok
        );
    }

    #[test]
    fn test_auto_ignore_unresponsive() {
        let wm = Arc::new(HeadlessWindowManager::with_process_id(OWN_PID));
        wm.open_window(1, "A", "a", None);
        let mut config = Config::default();
        config.behavior.auto_ignore_unresponsive = true;
        let mut state = AppState::new_with_config(config, wm.clone()).unwrap();
        let mail = create(&mut state, "Mail");
        wm.set_hung(1, true);

        let response = state.handle_command(IpcCommand::SwitchDesktop { desktop: mail });

        assert_eq!(response, IpcResponse::Ok);
        assert!(state.manager.snapshot(1).unwrap().is_ignored());
    }

    #[test]
    fn test_rejected_command_restarts_manager() {
        let (wm, mut state) = test_state();
        create(&mut state, "Mail");
        state.pending_events = None;

        let response = state.handle_command(IpcCommand::SwitchDesktop { desktop: 99 });

        assert!(matches!(response, IpcResponse::Error { .. }));
        assert!(!state.manager.is_closed());
        assert_eq!(state.manager.desktops().count(), 1);
        assert!(state.pending_events.is_some());
        assert_eq!(wm.visible_windows().len(), 3);
    }

    #[test]
    fn test_suspend_current_desktop_is_refused() {
        let (_wm, mut state) = test_state();
        let startup = state.manager.startup().0;

        let response = state.handle_command(IpcCommand::SuspendDesktop { desktop: startup });

        assert!(matches!(response, IpcResponse::Error { .. }));
        assert!(!state.manager.is_closed());
    }

    #[test]
    fn test_suspend_without_providers_keeps_desktop_live() {
        let (wm, mut state) = test_state();
        let mail = create(&mut state, "Mail");
        state.handle_command(IpcCommand::MoveWindow {
            window: Some(1),
            desktop: mail,
        });

        let response = state.handle_command(IpcCommand::SuspendDesktop { desktop: mail });

        assert_eq!(
            response,
            IpcResponse::Suspended {
                desktop: mail,
                persisted: 0,
                released: vec![]
            }
        );
        assert!(!wm.is_visible(1));
        let desktop = state.manager.desktop(WorkspaceId(mail)).unwrap();
        assert!(!desktop.is_suspended());
        assert_eq!(desktop.windows(), &[1]);
    }

    #[test]
    fn test_store_session_response() {
        let (_wm, mut state) = test_state();
        let mail = create(&mut state, "Mail");
        state.handle_command(IpcCommand::MoveWindow {
            window: Some(3),
            desktop: mail,
        });

        let IpcResponse::Session { session } =
            state.handle_command(IpcCommand::StoreSession { desktop: mail })
        else {
            panic!("Expected Session response");
        };
        let session: Session = serde_json::from_value(session).unwrap();
        assert_eq!(session.name, "Mail");
        assert_eq!(session.windows.len(), 1);
        assert_eq!(session.windows[0].id, 3);
    }

    #[test]
    fn test_refresh_reports_new_windows() {
        let (wm, mut state) = test_state();
        wm.open_window(4, "D", "d", None);
        wm.destroy_window(1);

        let response = state.handle_command(IpcCommand::Refresh);

        assert_eq!(response, IpcResponse::Refreshed { added: 1, dropped: 1 });
    }

    #[test]
    fn test_sessions_survive_restart() {
        let path = temp_path("sessions");
        let (wm, mut state) = test_state();
        let mail = create(&mut state, "Mail");
        state.handle_command(IpcCommand::MoveWindow {
            window: Some(2),
            desktop: mail,
        });

        assert_eq!(state.save_sessions(&path).unwrap(), 1);
        state.shutdown();
        drop(state);
        assert_eq!(wm.visible_windows().len(), 3);

        let mut state = AppState::new_with_config(Config::default(), wm.clone()).unwrap();
        let file = AppState::load_sessions(&path).unwrap();
        assert_eq!(state.restore_sessions(file), 1);

        let restored: Vec<&Desktop> = state.manager.desktops().collect();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].name(), "Mail");
        assert_eq!(restored[1].windows(), &[2]);
        assert!(!wm.is_visible(2));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_sessions_missing_or_corrupt() {
        let path = temp_path("corrupt");
        assert!(AppState::load_sessions(&path).is_none());

        std::fs::write(&path, "not json").unwrap();
        assert!(AppState::load_sessions(&path).is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_error_response_mapping() {
        let fault = vdesk_core::UnresponsiveWindowFault {
            desktop: WorkspaceId(4),
            windows: vec![7],
        };
        assert_eq!(
            error_response(DesktopError::Unresponsive(fault)),
            IpcResponse::Unresponsive {
                desktop: 4,
                windows: vec![7]
            }
        );
        assert_eq!(
            error_response(DesktopError::InvalidState("closed".into())),
            IpcResponse::error("Invalid state: closed")
        );
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_log_level("warn"), Level::WARN);
        assert_eq!(parse_log_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_ipc_message_size_is_bounded() {
        const { assert!(MAX_IPC_MESSAGE_SIZE >= 1024) };
        const { assert!(MAX_IPC_MESSAGE_SIZE <= 1024 * 1024) };
    }
}
