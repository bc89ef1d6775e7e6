//! vdesk CLI
//!
//! Command-line interface for controlling the vdesk virtual desktop manager.
//!
//! Commands are sent to the daemon via IPC (named pipe on Windows, Unix
//! domain socket elsewhere), one JSON line per request.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use vdesk_ipc::{decode_line, encode_line, IpcCommand, IpcResponse};

/// How long to wait for the daemon to answer.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "vdesk-cli")]
#[command(author, version, about = "Control the vdesk virtual desktop manager")]
struct Cli {
    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List desktops
    List,
    /// Create an empty desktop
    Create {
        /// Display name (default: "Desktop N")
        name: Option<String>,
    },
    /// Switch to a desktop
    Switch {
        /// Desktop id
        desktop: u32,
    },
    /// Move every window of one desktop into another and discard it
    Merge {
        /// Desktop to discard
        from: u32,
        /// Desktop receiving the windows
        into: u32,
    },
    /// Rename a desktop
    Rename { desktop: u32, name: String },
    /// Cut a window onto the clipboard
    Cut {
        /// Window handle (default: the foreground window)
        #[arg(short, long)]
        window: Option<u64>,
    },
    /// Paste the clipboard onto the current desktop
    Paste,
    /// Move a window to another desktop
    Move {
        /// Target desktop id
        desktop: u32,
        /// Window handle (default: the foreground window)
        #[arg(short, long)]
        window: Option<u64>,
    },
    /// Persist a hidden desktop's applications and close them
    Suspend { desktop: u32 },
    /// Relaunch a suspended desktop's applications
    Resume { desktop: u32 },
    /// Stop including windows in show and hide operations
    Ignore {
        desktop: u32,
        /// Window handles
        #[arg(required = true)]
        windows: Vec<u64>,
    },
    /// Show the clipboard contents
    Clipboard,
    /// Print a desktop as a stored session
    Store { desktop: u32 },
    /// Capture new windows and drop destroyed ones now
    Refresh,
    /// Reload configuration
    Reload,
    /// Stop the daemon
    Stop,
}

impl Commands {
    fn into_ipc(self) -> IpcCommand {
        match self {
            Commands::List => IpcCommand::ListDesktops,
            Commands::Create { name } => IpcCommand::CreateDesktop { name },
            Commands::Switch { desktop } => IpcCommand::SwitchDesktop { desktop },
            Commands::Merge { from, into } => IpcCommand::MergeDesktops { from, into },
            Commands::Rename { desktop, name } => IpcCommand::RenameDesktop { desktop, name },
            Commands::Cut { window } => IpcCommand::CutWindow { window },
            Commands::Paste => IpcCommand::PasteWindows,
            Commands::Move { desktop, window } => IpcCommand::MoveWindow { window, desktop },
            Commands::Suspend { desktop } => IpcCommand::SuspendDesktop { desktop },
            Commands::Resume { desktop } => IpcCommand::ResumeDesktop { desktop },
            Commands::Ignore { desktop, windows } => IpcCommand::IgnoreWindows { desktop, windows },
            Commands::Clipboard => IpcCommand::QueryClipboard,
            Commands::Store { desktop } => IpcCommand::StoreSession { desktop },
            Commands::Refresh => IpcCommand::Refresh,
            Commands::Reload => IpcCommand::Reload,
            Commands::Stop => IpcCommand::Stop,
        }
    }
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable form of a response.
fn render(response: &IpcResponse) -> String {
    match response {
        IpcResponse::Ok => "ok".to_string(),
        IpcResponse::Error { message } => format!("error: {}", message),
        IpcResponse::Unresponsive { desktop, windows } => format!(
            "{} window(s) on desktop {} are not responding: {}\n\
             run `vdesk-cli ignore {} {}` and retry",
            windows.len(),
            desktop,
            join_ids(windows),
            desktop,
            join_ids(windows)
        ),
        IpcResponse::Desktops {
            current,
            startup,
            desktops,
        } => {
            let mut lines = Vec::with_capacity(desktops.len());
            for d in desktops {
                let marker = if d.id == *current { '*' } else { ' ' };
                let mut line = format!("{} {:>3}  {:<20} {:>3} window(s)", marker, d.id, d.name, d.windows);
                if d.id == *startup {
                    line.push_str("  [startup]");
                }
                if d.suspended {
                    line.push_str(&format!("  [suspended, {} app(s)]", d.applications));
                }
                lines.push(line);
            }
            lines.join("\n")
        }
        IpcResponse::DesktopCreated { desktop } => format!("created desktop {}", desktop),
        IpcResponse::Windows { windows } if windows.is_empty() => "no windows".to_string(),
        IpcResponse::Windows { windows } => join_ids(windows),
        IpcResponse::Suspended {
            desktop,
            persisted,
            released,
        } => {
            let mut text = format!("desktop {}: {} application(s) persisted", desktop, persisted);
            if !released.is_empty() {
                text.push_str(&format!(
                    ", {} window(s) moved to the current desktop",
                    released.len()
                ));
            }
            text
        }
        IpcResponse::Session { session } => {
            serde_json::to_string_pretty(session).unwrap_or_else(|_| session.to_string())
        }
        IpcResponse::Refreshed { added, dropped } => {
            format!("{} window(s) added, {} dropped", added, dropped)
        }
    }
}

/// Send one command over an established connection and read the answer.
async fn exchange<S>(stream: S, command: &IpcCommand) -> Result<IpcResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    writer.write_all(encode_line(command)?.as_bytes()).await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let read = tokio::time::timeout(RESPONSE_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("Timed out waiting for the daemon")??;
    if read == 0 {
        bail!("Daemon closed the connection without answering");
    }
    Ok(decode_line(&line)?)
}

#[cfg(windows)]
async fn send(command: &IpcCommand) -> Result<IpcResponse> {
    use tokio::net::windows::named_pipe::ClientOptions;
    let pipe = ClientOptions::new()
        .open(vdesk_ipc::PIPE_NAME)
        .with_context(|| format!("Is the vdesk daemon running? ({})", vdesk_ipc::PIPE_NAME))?;
    exchange(pipe, command).await
}

#[cfg(unix)]
async fn send(command: &IpcCommand) -> Result<IpcResponse> {
    let path = vdesk_ipc::socket_path();
    let stream = tokio::net::UnixStream::connect(&path)
        .await
        .with_context(|| format!("Is the vdesk daemon running? ({})", path.display()))?;
    exchange(stream, command).await
}

#[cfg(not(any(windows, unix)))]
async fn send(_command: &IpcCommand) -> Result<IpcResponse> {
    bail!("No IPC transport on this platform")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.into_ipc();
    let response = send(&command).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", render(&response));
    }

    match response {
        IpcResponse::Error { .. } | IpcResponse::Unresponsive { .. } => std::process::exit(1),
        _ => Ok(()),
    }
}
