//! A turn-based multiplayer grid-game server and its terminal client.
//!
//! Several players connect over TCP, claim a symbol each, and take turns
//! placing marks on a shared N×N board until someone completes a winning
//! line or the board fills up. Win counts persist across server restarts.
//! Each module owns one concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`config`] holds the per-deployment settings, validated at startup.
//! - [`protocol`] is the line-oriented wire codec shared by both sides.
//! - [`board`] and [`rules`] model the grid and the pure win/draw check.
//! - [`state`] is the shared game-state store every task goes through.
//! - [`scheduler`] drives the round lifecycle and turn rotation.
//! - [`handler`] runs one player's session per accepted connection.
//! - [`logger`] buffers audit records and drains them to a file.
//! - [`scores`] loads and rewrites the win-count file.
//! - [`server`] binds, accepts, and spawns the whole thing.
//! - [`client`] is the interactive terminal front end.
//!
//! Integration and unit tests use this crate directly to exercise the
//! store, the scheduler, and the wire protocol.

pub mod board;
pub mod cli;
pub mod client;
pub mod config;
pub mod handler;
pub mod logger;
pub mod protocol;
pub mod rules;
pub mod scheduler;
pub mod scores;
pub mod server;
pub mod state;
