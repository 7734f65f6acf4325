//! Reef Server Library
//!
//! Authoritative server for a small shared 3D underwater world. Clients
//! connect over WebSocket, steer their avatar with direction tokens, chat and
//! attack a patrolling enemy. The server owns a rapier3d world stepped at a
//! fixed tick and broadcasts full JSON snapshots whenever something changed.
//!
//! # Features
//!
//! - `debug_meshes` - Collider wireframe broadcast via rapier's debug renderer
//!   (enabled by default, still needs `DEBUG_MESHES=true` at runtime)

pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod util;
