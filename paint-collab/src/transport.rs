//! Bridges one WebSocket connection to the session.
//!
//! Inbound binary frames are decoded into packages and forwarded as
//! [`PeerEvent`]s; packages the worker queues on the peer's channel are
//! written out in order. Server and client share this loop.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::peer::PeerChannel;
use crate::protocol::Package;
use crate::session::PeerEvent;

/// Transport errors.
#[derive(Debug)]
pub enum TransportError {
    Io(std::io::Error),
    WebSocket(tungstenite::Error),
    /// The session stopped taking events
    SessionClosed,
    /// The server is at `max_peers`
    TooManyPeers,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            Self::SessionClosed => write!(f, "Session closed"),
            Self::TooManyPeers => write!(f, "Too many peers"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(e)
    }
}

/// Serve one established connection until either side closes it.
///
/// Registers the peer with the session first and always reports the
/// disconnect, whatever ended the loop.
pub async fn run_connection<S>(
    ws_stream: WebSocketStream<S>,
    label: String,
    initiate: bool,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (channel, mut outgoing) = PeerChannel::new(label.clone());
    let peer_id = channel.id;
    peer_events
        .send(PeerEvent::Connected { channel, initiate })
        .map_err(|_| TransportError::SessionClosed)?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let result = loop {
        tokio::select! {
            // Incoming WebSocket message
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => match Package::decode(&data) {
                        Ok(package) => {
                            log::trace!("{:?} from {label}", package.package_type);
                            let event = PeerEvent::Package { from: peer_id, package };
                            if peer_events.send(event).is_err() {
                                break Err(TransportError::SessionClosed);
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to decode package from {label}: {e}");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed by {label}");
                        break Ok(());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {label}: {e}");
                        break Err(e.into());
                    }
                    _ => {}
                }
            }
            // Outgoing package queued by the worker
            out = outgoing.recv() => {
                match out {
                    Some(bytes) => {
                        if let Err(e) = ws_sender.send(Message::Binary(bytes)).await {
                            log::error!("Failed to write to {label}: {e}");
                            break Err(e.into());
                        }
                    }
                    None => {
                        // The session dropped this peer
                        log::debug!("Closing connection to {label}");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break Ok(());
                    }
                }
            }
        }
    };

    let _ = peer_events.send(PeerEvent::Disconnected { peer_id });
    result
}
