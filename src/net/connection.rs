use hashbrown::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::game::state::EntityId;

/// Which listener a connection arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Gameplay socket, bound to one player
    Game,
    /// Chat-only socket
    Chat,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no player yet
    Connecting,
    /// Active
    Connected,
    /// Writer gone, waiting for teardown
    Closed,
}

/// One open WebSocket. Outbound frames go through a bounded queue to the
/// connection's writer task; a client that stops reading loses frames
/// instead of growing the queue.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub kind: ConnectionKind,
    pub player_id: Option<EntityId>,
    pub remote_addr: SocketAddr,
    pub state: ConnectionState,
    pub created_at: Instant,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    sender: Sender<Message>,
}

impl Connection {
    pub fn new(
        id: u64,
        kind: ConnectionKind,
        remote_addr: SocketAddr,
        sender: Sender<Message>,
    ) -> Self {
        Self {
            id,
            kind,
            player_id: None,
            remote_addr,
            state: ConnectionState::Connecting,
            created_at: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
            messages_sent: 0,
            messages_received: 0,
            messages_dropped: 0,
            sender,
        }
    }

    /// Queue a text frame. Returns false if the frame was not queued, either
    /// because the writer has gone away or because its queue is full.
    pub fn send_text(&mut self, text: String) -> bool {
        let len = text.len();
        match self.sender.try_send(Message::Text(text.into())) {
            Ok(()) => {
                self.bytes_sent += len as u64;
                self.messages_sent += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.messages_dropped += 1;
                debug!("Connection {} outbound queue full, frame dropped", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.state = ConnectionState::Closed;
                false
            }
        }
    }

    /// Record bytes received
    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.messages_received += 1;
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Closed && !self.sender.is_closed()
    }
}

/// Connection manager
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: HashMap<u64, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with a random ID
    pub fn create(
        &mut self,
        kind: ConnectionKind,
        remote_addr: SocketAddr,
        sender: Sender<Message>,
    ) -> u64 {
        let id = loop {
            let candidate = rand::random::<u64>();
            if !self.connections.contains_key(&candidate) {
                break candidate;
            }
        };

        self.connections
            .insert(id, Connection::new(id, kind, remote_addr, sender));
        id
    }

    pub fn get(&self, id: u64) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Bind a player to a connection and mark it connected
    pub fn associate_player(&mut self, conn_id: u64, player_id: EntityId) -> bool {
        match self.connections.get_mut(&conn_id) {
            Some(conn) => {
                conn.player_id = Some(player_id);
                conn.state = ConnectionState::Connected;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u64) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }
}
