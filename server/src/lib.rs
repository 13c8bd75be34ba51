//! # Shared-Space Server Library
//!
//! This library provides the authoritative side of a multi-participant
//! shared space. It owns the scene, lets tracked hand controllers grab,
//! move, duplicate and delete objects, learns rules from demonstrated
//! manipulations, and pushes the full state to every peer each tick.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! All edits happen here. Peers only send tracked-device samples; the server
//! decides what those samples do and broadcasts the outcome.
//!
//! ### Rules by Demonstration
//! Objects placed in the appliance define a configuration. Edits made to the
//! staged copies of that configuration are recorded and later replayed on
//! every matching configuration in the world.
//!
//! ### State Broadcasting
//! Every tick the whole scene is serialised with the fixed-layout codec and
//! framed per peer. There are no retries: losing a datagram is repaired by
//! the next tick's copy, and peers merge field by field on sequence number.
//!
//! ## Module Organization
//!
//! - `entity`, `spatial`: the entity arena, lists and proximity queries
//! - `controller`, `manipulation`: per-controller grab/move/duplicate/delete
//! - `rules`: condition synthesis, matching and replay
//! - `world`: `WorldState` and the ordered per-tick pipeline
//! - `sync`: world to wire messages and datagrams
//! - `client_manager`: peer registry with stale/evict policy
//! - `snapshot`, `config`, `network`: persistence, settings and the tokio loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Ticks at 90 Hz until Ctrl-C, then flushes and exits.
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod controller;
pub mod entity;
pub mod manipulation;
pub mod network;
pub mod rules;
pub mod snapshot;
pub mod spatial;
pub mod sync;
pub mod world;
