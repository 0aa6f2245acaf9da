//! North-bound IEC 60870-5-104 slave gateway core.
//!
//! Publishes monitored measurements and state indications to supervisory
//! masters, answers general-interrogation sweeps, forwards controls to a
//! southern process and correlates the feedback into the ACT-CON/ACT-TERM
//! handshake. The APCI codec (framing, I/S/U frames, sequence numbers,
//! k/w/t0..t3 timers) is an external collaborator reached through the traits
//! in [`link`].

pub mod audit;
pub mod config;
pub mod link;
pub mod plugin;
pub mod points;
pub mod protocol;
pub mod redundancy;
pub mod server;

mod dispatcher;
mod monitor;
mod session;
mod tracker;

pub use config::{ExchangeConfig, GatewayConfig, PointConfig, ProtocolConfig, ServerMode};
pub use dispatcher::{ConnectionStatus, GiStatus};
pub use server::{Iec104Server, StartError};
