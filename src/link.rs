//! Contract between the gateway core and its host: the T104 codec that owns
//! the TCP listener, APCI framing and per-session queues, plus the audit and
//! wall-clock services. The codec binding maps its own session objects onto
//! [`MasterSession`] capability handles; everything the core retains past a
//! handler invocation is copied into owned values first.

use crate::protocol::Asdu;
use async_trait::async_trait;
use chrono::Utc;
use std::net::IpAddr;
use thiserror::Error;

pub type SessionId = u64;

pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("listener is not running")]
    NotRunning,
    #[error("listener failed to bind: {0}")]
    Bind(String),
    #[error("session closed")]
    SessionClosed,
    #[error("outbound queue full")]
    QueueFull,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Peer connection lifecycle events surfaced by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionEvent {
    /// TCP connection accepted, data transfer not yet started.
    Opened,
    /// Connection gone; the session will not be used again.
    Closed,
    /// STARTDT confirmed, this session now receives queued ASDUs.
    Activated,
    /// STOPDT confirmed, session falls back to standby.
    Deactivated,
}

/// One accepted master connection, owned by the codec.
#[async_trait]
pub trait MasterSession: Send + Sync {
    fn id(&self) -> SessionId;
    fn peer_ip(&self) -> IpAddr;
    fn peer_port(&self) -> u16;

    /// Queue one ASDU on this session's outbound queue. May briefly block on
    /// codec-internal flow control.
    async fn send_asdu(&self, asdu: Asdu) -> LinkResult<()>;
}

/// The codec-side slave endpoint: listener control, connection cap and the
/// global queue distributed to the active session of every redundancy group.
#[async_trait]
pub trait SlaveLink: Send + Sync {
    fn start(&self) -> LinkResult<()>;
    fn stop(&self);
    fn is_running(&self) -> bool;

    /// Cap on concurrently open connections, installed once at startup.
    fn set_max_open_connections(&self, limit: usize);

    /// Enqueue on the global FIFO queue for spontaneous distribution.
    async fn enqueue_spontaneous(&self, asdu: Asdu) -> LinkResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    Success,
    Failure,
    Information,
}

/// Host audit-log sink. Keys are already de-duplicated by the emitter.
pub trait AuditSink: Send + Sync {
    fn audit(&self, severity: AuditSeverity, key: &str);
}

/// Wall clock used for command timestamp validation, tracker deadlines and
/// clock synchronization. Setting the system time is privileged and therefore
/// part of the host contract rather than this crate.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;

    /// Apply a clock synchronization command. Returns false when the host
    /// cannot (or will not) adjust the wall clock.
    fn apply_time_sync(&self, epoch_ms: u64) -> bool;
}

/// Reads the OS clock; time-sync application is left to the embedding host.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }

    fn apply_time_sync(&self, epoch_ms: u64) -> bool {
        tracing::warn!(epoch_ms, "time sync requested but no privileged clock service is wired");
        false
    }
}

/// Destination for an egress operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationDestination<'a> {
    Broadcast,
    Service(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationParameter {
    pub name: &'static str,
    pub value: String,
}

impl OperationParameter {
    pub fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Host callback carrying egress operations (commands, status requests)
/// towards the southern process. A positive return value means the operation
/// was accepted synchronously.
#[async_trait]
pub trait OperationSink: Send + Sync {
    async fn operation(
        &self,
        operation: &str,
        parameters: &[OperationParameter],
        destination: OperationDestination<'_>,
    ) -> i32;
}
