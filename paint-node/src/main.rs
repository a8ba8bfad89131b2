//! Paint node: one collaborative drawing session on the command line.
//!
//! Listens for peers, dials peers, or both, and keeps the local history in
//! sync with them. Drawing commands are read from stdin (see [`console`]).
//!
//! ```text
//! paint-node --listen 127.0.0.1:9090
//! paint-node --connect ws://127.0.0.1:9090
//! RUST_LOG=debug paint-node --listen 0.0.0.0:9091 --connect ws://10.0.0.2:9090
//! ```

mod console;

use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use paint_collab::{
    ClientConfig, ResponseRouting, ServerConfig, Session, SessionConfig, SessionEvent,
    SessionHandle, SyncClient, SyncServer, WorkerConfig,
};
use paint_core::{CommandMemento, Pen};

use console::Input;

/// Collaborative drawing node with history synchronization
#[derive(Parser, Debug)]
#[command(name = "paint-node")]
#[command(version, about, long_about = None)]
struct Args {
    /// Accept peers on this address
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Dial a peer (may be given more than once)
    #[arg(long, value_name = "URL")]
    connect: Vec<String>,

    /// Rebroadcast the history hash every N seconds
    #[arg(long, value_name = "N")]
    resync_secs: Option<u64>,

    /// Answer sync requests only to the asking peer
    #[arg(long)]
    unicast: bool,

    /// Maximum accepted peers
    #[arg(long, default_value_t = 64)]
    max_peers: usize,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let routing = if self.unicast {
            ResponseRouting::Unicast
        } else {
            ResponseRouting::Broadcast
        };
        SessionConfig {
            worker: WorkerConfig { routing },
            resync_interval: self.resync_secs.filter(|s| *s > 0).map(Duration::from_secs),
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut session = Session::spawn(args.session_config());
    let handle = session.handle();
    if let Some(events) = session.take_event_rx() {
        tokio::spawn(log_events(events));
    }

    if let Some(bind_addr) = args.listen.clone() {
        let config = ServerConfig {
            bind_addr,
            max_peers: args.max_peers,
        };
        let server = SyncServer::new(config, &handle);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Server stopped: {e}");
            }
        });
    }

    for url in &args.connect {
        let mut client = SyncClient::new(ClientConfig { url: url.clone() }, &handle);
        if let Err(e) = client.connect().await {
            warn!("Could not reach {url}: {e}");
        }
    }

    info!("Paint node ready, type commands (line, rect, ellipse, free, undo, redo, show, quit)");

    tokio::select! {
        _ = read_console(&handle) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    handle.shutdown();
    info!("Paint node stopped");
}

async fn read_console(handle: &SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pen = Pen::default();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let input = match console::parse(&line) {
            Ok(input) => input,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };

        let result = match input {
            Input::Shape { kind, points } => handle
                .add(CommandMemento::new(kind, pen, points))
                .await
                .map(|_| ()),
            Input::Color(color) => {
                pen.color = color;
                Ok(())
            }
            Input::Width(width) => {
                pen.width = width;
                Ok(())
            }
            Input::Undo => handle.undo().await.map(|done| {
                if !done {
                    info!("Nothing to undo");
                }
            }),
            Input::Redo => handle.redo().await.map(|done| {
                if !done {
                    info!("Nothing to redo");
                }
            }),
            Input::Clear => handle.clear().await,
            Input::Sync => handle.resync().await,
            Input::Show => handle.snapshot().await.map(|snapshot| {
                info!(
                    "{} of {} commands applied, hash {:016x}",
                    snapshot.cursor, snapshot.len, snapshot.total_hash
                );
                for (i, memento) in snapshot.commands.iter().enumerate() {
                    info!("  {i}: kind {} {:?}", memento.kind, memento.points);
                }
            }),
            Input::Quit => break,
        };

        if let Err(e) = result {
            warn!("{e}");
            if handle.is_closed() {
                break;
            }
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::HistoryChanged { len, cursor } => {
                info!("History: {cursor}/{len}");
            }
            SessionEvent::Reconciled(report) if report.is_complete() => {
                info!(
                    "Synced from position {}: -{} +{}",
                    report.from_position, report.popped, report.applied
                );
            }
            SessionEvent::Reconciled(report) => {
                warn!(
                    "Synced from position {} with {} rejected command(s)",
                    report.from_position,
                    report.failed.len()
                );
            }
            SessionEvent::PeerConnected(peer_id) => info!("Peer {peer_id} joined"),
            SessionEvent::PeerDisconnected(peer_id) => info!("Peer {peer_id} left"),
            SessionEvent::Error(e) => warn!("Sync error: {e}"),
        }
    }
}
