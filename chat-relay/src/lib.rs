//! Real-time group chat relay.
//!
//! Clients open a long-lived connection, announce a username with an
//! `add-user` event, and exchange `send-message` events that are fanned out to
//! every client subscribed to the public topic. Each module owns one piece:
//!
//! - [`session`] keeps the live sessions and their bound usernames.
//! - [`router`] holds per-topic subscriber sets and performs the fan-out into
//!   bounded per-connection queues.
//! - [`dispatch`] maps event types to handlers and applies the policy flags.
//! - [`relay`] ties the three together and owns connect/disconnect.
//! - [`connection`] runs one connection's read/write loop over any
//!   [`connection::Transport`]; [`transport`] provides WebSocket and
//!   newline-delimited JSON implementations.
//! - [`server`] serves the WebSocket endpoint with axum and accepts
//!   line-protocol TCP clients.
//! - [`message`] defines the JSON event and the line framing helpers.
//! - [`cli`], [`config`] and [`client`] cover the binary: flags, relay
//!   configuration and a terminal chat client.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod message;
pub mod relay;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;
