//! WebSocket server
//!
//! One listener for gameplay and, when configured, a second one for chat.
//! Each connection gets a writer task draining a bounded channel, so the
//! session can queue frames without awaiting while it holds its lock.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async_with_config;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::game::constants::net::{OUTBOUND_QUEUE, SERVER_FULL_MESSAGE};
use crate::game::GameError;
use crate::metrics::Metrics;
use crate::net::connection::ConnectionKind;
use crate::net::game_session::{start_game_loop, GameSession};
use crate::net::protocol::{decode, encode, ClientMessage, ServerMessage};

type SharedSession = Arc<RwLock<GameSession>>;

/// WebSocket server
pub struct WebSocketServer {
    game_listener: TcpListener,
    chat_listener: Option<TcpListener>,
    session: SharedSession,
    metrics: Arc<Metrics>,
    ws_config: WebSocketConfig,
}

impl WebSocketServer {
    /// Bind the listeners and create the game session
    pub async fn bind(config: &ServerConfig, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let game_listener =
            TcpListener::bind(SocketAddr::new(config.bind_address, config.port)).await?;
        let chat_listener = match config.chat_port {
            Some(port) => Some(TcpListener::bind(SocketAddr::new(config.bind_address, port)).await?),
            None => None,
        };

        let session = Arc::new(RwLock::new(GameSession::new(config, metrics.clone())));
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));

        Ok(Self {
            game_listener,
            chat_listener,
            session,
            metrics,
            ws_config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.game_listener.local_addr()
    }

    pub fn chat_addr(&self) -> Option<SocketAddr> {
        self.chat_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Game WebSocket listening on ws://{}", self.local_addr()?);

        start_game_loop(self.session.clone(), self.metrics.clone());

        if let Some(chat_listener) = self.chat_listener {
            info!("Chat WebSocket listening on ws://{}", chat_listener.local_addr()?);
            let session = self.session.clone();
            let metrics = self.metrics.clone();
            let ws_config = self.ws_config;
            tokio::spawn(async move {
                accept_loop(chat_listener, ConnectionKind::Chat, session, metrics, ws_config).await;
            });
        }

        accept_loop(
            self.game_listener,
            ConnectionKind::Game,
            self.session,
            self.metrics,
            self.ws_config,
        )
        .await;
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    kind: ConnectionKind,
    session: SharedSession,
    metrics: Arc<Metrics>,
    ws_config: WebSocketConfig,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let session = session.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, kind, session, metrics, ws_config).await {
                warn!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    kind: ConnectionKind,
    session: SharedSession,
    metrics: Arc<Metrics>,
    ws_config: WebSocketConfig,
) -> anyhow::Result<()> {
    let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
    debug!("WebSocket handshake complete with {}", addr);

    let (mut sink, mut source) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    let conn_id = match kind {
        ConnectionKind::Chat => session.write().await.join_chat(addr, tx),
        ConnectionKind::Game => {
            let joined = session.write().await.join(addr, tx);
            match joined {
                Ok((conn_id, _)) => conn_id,
                Err(GameError::ServerFull(max)) => {
                    metrics.connections_rejected.fetch_add(1, Ordering::Relaxed);
                    info!("Server full ({} players), rejecting {}", max, addr);
                    let text = encode(&ServerMessage::ServerFull(SERVER_FULL_MESSAGE.to_string()))?;
                    sink.send(Message::Text(text.into())).await?;
                    sink.close().await?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Connection {} read error: {}", conn_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => dispatch(&session, &metrics, conn_id, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => dispatch(&session, &metrics, conn_id, text).await,
                Err(_) => {
                    metrics.malformed_messages.fetch_add(1, Ordering::Relaxed);
                    warn!("Non UTF-8 binary frame from connection {}", conn_id);
                }
            },
            Message::Close(_) => break,
            // Pings are answered by tungstenite itself
            _ => {}
        }
    }

    session.write().await.leave(conn_id);
    let _ = writer.await;
    debug!("Connection {} from {} closed", conn_id, addr);
    Ok(())
}

/// Decode one frame and hand it to the session. Malformed input is logged
/// and dropped; the connection stays open.
async fn dispatch(session: &SharedSession, metrics: &Metrics, conn_id: u64, text: &str) {
    metrics.record_received(text.len());

    let message = match decode::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            metrics.malformed_messages.fetch_add(1, Ordering::Relaxed);
            warn!("Malformed message from connection {}: {}", conn_id, e);
            return;
        }
    };

    let mut session = session.write().await;
    if let Some(conn) = session.connections.get_mut(conn_id) {
        conn.record_received(text.len());
    }
    session.handle_message(conn_id, message);
}
