//! # Headless Participant Library
//!
//! This library provides a scripted participant for the shared-space server.
//! It stands in for a headset: it streams tracked-device samples to the
//! server once per tick and mirrors the broadcast scene locally, without
//! rendering anything.
//!
//! ## Architecture Overview
//!
//! The participant never predicts. Everything it shows comes from the
//! server, and it converges by merging every message field by field:
//! a field only takes a write stamped with a newer sequence number than the
//! one it holds. Lost or reordered frames therefore cost nothing more than
//! a tick of staleness, because the server resends the full state every tick.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Generates avatar samples from a script:
//! - `idle` keeps both hands at rest
//! - `reach` picks the nearest placeable object, grabs it, drags it
//!   sideways and releases it, over and over
//! - Seeded jitter so runs are reproducible
//!
//! ### Game Module (`game`)
//! The replicated scene:
//! - Per-field last-writer-wins merge of decoded messages
//! - Tick boundaries recognised by the leading simulation-time message
//! - Segment expiry once a segment stops being refreshed
//!
//! ### Network Module (`network`)
//! The UDP loop:
//! - One framed avatar record per tick, carrying our acks
//! - Incoming frames pass through the reliability channel before the scene
//! - A summary line every second
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::{InputScript, Script};
//! use client::network::Client;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let script = InputScript::new(Script::Reach, 7);
//! let mut client = Client::new("127.0.0.1:8080", 90, script).await?;
//! client.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod game;
pub mod input;
pub mod network;
