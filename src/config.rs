//! Immutable in-memory configuration snapshot. The host parses its three
//! configuration strings (protocol stack, data exchange, TLS) into these
//! shapes before the server is constructed.

use crate::protocol::{CommonAddr, ASDU_SIZE_DEFAULT};
use serde::{Deserialize, Serialize};
use std::{
    net::IpAddr,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown protocol type name: {0}")]
    UnknownTypeName(String),
    #[error("type {type_name} is not valid for a {kind} point ({ca}:{ioa})")]
    TypeKindMismatch {
        type_name: String,
        kind: &'static str,
        ca: CommonAddr,
        ioa: u32,
    },
    #[error("duplicate point definition for {ca}:{ioa}")]
    DuplicatePoint { ca: CommonAddr, ioa: u32 },
    #[error("information object address {ioa} out of range for {ca}")]
    IoaOutOfRange { ca: CommonAddr, ioa: u32 },
}

/// Listener operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    #[default]
    ConnectAlways,
    ConnectIfSouthConnxStarted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    /// Listening port, default 2404
    #[serde(default = "ProtocolConfig::default_port")]
    pub tcp_port: u16,
    /// Local bind address; unset means all interfaces
    #[serde(default)]
    pub local_ip: Option<IpAddr>,
    /// k window (max unacked I-frames)
    #[serde(default = "ProtocolConfig::default_k")]
    pub k: u16,
    /// w threshold (ack aggregation)
    #[serde(default = "ProtocolConfig::default_w")]
    pub w: u16,
    /// t0 connect timeout (s)
    #[serde(default = "ProtocolConfig::default_t0")]
    pub t0: u16,
    /// t1 I-frame ack timeout (s)
    #[serde(default = "ProtocolConfig::default_t1")]
    pub t1: u16,
    /// t2 ack aggregation timeout (s)
    #[serde(default = "ProtocolConfig::default_t2")]
    pub t2: u16,
    /// t3 idle test frame interval (s)
    #[serde(default = "ProtocolConfig::default_t3")]
    pub t3: u16,
    /// Common address width in bytes (1 or 2)
    #[serde(default = "ProtocolConfig::default_ca_size")]
    pub ca_size: u8,
    /// Information object address width in bytes (1..3)
    #[serde(default = "ProtocolConfig::default_ioa_size")]
    pub ioa_size: u8,
    /// Max encoded ASDU size; 0 selects the protocol default
    #[serde(default)]
    pub asdu_size: u16,
    /// Codec-level spontaneous queue capacity
    #[serde(default = "ProtocolConfig::default_asdu_queue_size")]
    pub asdu_queue_size: usize,
    #[serde(default)]
    pub mode: ServerMode,
    /// Whether C_CS_NA_1 may adjust the wall clock
    #[serde(default)]
    pub time_sync: bool,
    #[serde(default = "ProtocolConfig::default_true")]
    pub accept_cmd_with_time: bool,
    #[serde(default = "ProtocolConfig::default_true")]
    pub accept_cmd_without_time: bool,
    /// Window for command timestamps (s); 0 disables the check
    #[serde(default)]
    pub cmd_recv_timeout: u64,
    /// Bound on waiting for southern command feedback (s)
    #[serde(default = "ProtocolConfig::default_cmd_exec_timeout")]
    pub cmd_exec_timeout: u64,
    /// Allowed originator addresses; empty means all are accepted
    #[serde(default)]
    pub allowed_originators: Vec<u8>,
    /// Service name for operation routing; empty means broadcast
    #[serde(default)]
    pub cmd_dest: String,
    /// Asset names of monitored south plugins
    #[serde(default)]
    pub south_monitoring: Vec<String>,
    #[serde(default)]
    pub redundancy_groups: Vec<RedGroupConfig>,
    /// Upper bound of group indices covered by startup audits
    #[serde(default = "ProtocolConfig::default_max_red_groups")]
    pub max_red_groups: usize,
}

impl ProtocolConfig {
    fn default_true() -> bool {
        true
    }

    fn default_port() -> u16 {
        2404
    }

    fn default_k() -> u16 {
        12
    }

    fn default_w() -> u16 {
        8
    }

    fn default_t0() -> u16 {
        30
    }

    fn default_t1() -> u16 {
        15
    }

    fn default_t2() -> u16 {
        10
    }

    fn default_t3() -> u16 {
        20
    }

    fn default_ca_size() -> u8 {
        2
    }

    fn default_ioa_size() -> u8 {
        3
    }

    fn default_asdu_queue_size() -> usize {
        100
    }

    fn default_cmd_exec_timeout() -> u64 {
        20
    }

    fn default_max_red_groups() -> usize {
        3
    }

    /// Broadcast sentinel for the configured CA width.
    #[inline]
    pub fn broadcast_ca(&self) -> CommonAddr {
        if self.ca_size == 1 {
            0xff
        } else {
            0xffff
        }
    }

    #[inline]
    pub fn max_asdu_size(&self) -> usize {
        if self.asdu_size == 0 {
            ASDU_SIZE_DEFAULT
        } else {
            self.asdu_size as usize
        }
    }

    #[inline]
    pub fn is_originator_allowed(&self, oa: u8) -> bool {
        self.allowed_originators.is_empty() || self.allowed_originators.contains(&oa)
    }

    #[inline]
    pub fn cmd_recv_timeout_ms(&self) -> u64 {
        self.cmd_recv_timeout * 1000
    }

    #[inline]
    pub fn cmd_exec_timeout_ms(&self) -> u64 {
        self.cmd_exec_timeout * 1000
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            tcp_port: Self::default_port(),
            local_ip: None,
            k: Self::default_k(),
            w: Self::default_w(),
            t0: Self::default_t0(),
            t1: Self::default_t1(),
            t2: Self::default_t2(),
            t3: Self::default_t3(),
            ca_size: Self::default_ca_size(),
            ioa_size: Self::default_ioa_size(),
            asdu_size: 0,
            asdu_queue_size: Self::default_asdu_queue_size(),
            mode: ServerMode::default(),
            time_sync: false,
            accept_cmd_with_time: true,
            accept_cmd_without_time: true,
            cmd_recv_timeout: 0,
            cmd_exec_timeout: Self::default_cmd_exec_timeout(),
            allowed_originators: Vec::new(),
            cmd_dest: String::new(),
            south_monitoring: Vec::new(),
            redundancy_groups: Vec::new(),
            max_red_groups: Self::default_max_red_groups(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedGroupConfig {
    pub name: String,
    /// Configured client addresses, at most two (paths A and B)
    pub connections: Vec<RedGroupConnectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedGroupConnectionConfig {
    pub client_ip: IpAddr,
}

/// One point of the data exchange block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointConfig {
    pub ca: CommonAddr,
    pub ioa: u32,
    /// Protocol type name, e.g. "M_SP_NA_1" or "C_DC_TA_1"
    pub type_name: String,
    /// GI group mask; bit 0 = station interrogation, bits 1..16 = groups
    #[serde(default = "PointConfig::default_gi_groups")]
    pub gi_groups: u32,
}

impl PointConfig {
    fn default_gi_groups() -> u32 {
        1
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeConfig {
    #[serde(default)]
    pub datapoints: Vec<PointConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub own_certificate: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub remote_certificates: Vec<String>,
    #[serde(default)]
    pub ca_certificates: Vec<String>,
}

impl TlsConfig {
    /// Certificate files live under `<data_dir>/etc/certs/`; PEM material,
    /// recognized by suffix, under `<data_dir>/etc/certs/pem/`.
    pub fn resolve_cert_path(data_dir: &Path, file_name: &str) -> PathBuf {
        let store = if file_name.ends_with(".pem") {
            data_dir.join("etc/certs/pem")
        } else {
            data_dir.join("etc/certs")
        };
        store.join(file_name)
    }
}

/// The three configuration blocks consumed at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub protocol: ProtocolConfig,
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_stack_block() {
        let cfg = ProtocolConfig::default();
        assert_eq!(cfg.tcp_port, 2404);
        assert_eq!(cfg.k, 12);
        assert_eq!(cfg.w, 8);
        assert_eq!(cfg.broadcast_ca(), 0xffff);
        assert_eq!(cfg.max_asdu_size(), ASDU_SIZE_DEFAULT);
        assert!(cfg.is_originator_allowed(17));
        assert_eq!(cfg.mode, ServerMode::ConnectAlways);
    }

    #[test]
    fn originator_allow_list_filters() {
        let cfg = ProtocolConfig {
            allowed_originators: vec![1, 2],
            ..Default::default()
        };
        assert!(cfg.is_originator_allowed(2));
        assert!(!cfg.is_originator_allowed(3));
    }

    #[test]
    fn one_byte_ca_broadcast_sentinel() {
        let cfg = ProtocolConfig {
            ca_size: 1,
            ..Default::default()
        };
        assert_eq!(cfg.broadcast_ca(), 0xff);
    }

    #[test]
    fn pem_suffix_selects_pem_store() {
        let dir = Path::new("/var/gateway");
        assert_eq!(
            TlsConfig::resolve_cert_path(dir, "server.pem"),
            PathBuf::from("/var/gateway/etc/certs/pem/server.pem")
        );
        assert_eq!(
            TlsConfig::resolve_cert_path(dir, "server.cer"),
            PathBuf::from("/var/gateway/etc/certs/server.cer")
        );
    }

    #[test]
    fn protocol_block_deserializes_camel_case() {
        let cfg: ProtocolConfig = serde_json::from_str(
            r#"{
                "tcpPort": 2405,
                "mode": "connect_if_south_connx_started",
                "cmdRecvTimeout": 5,
                "redundancyGroups": [
                    {"name": "scada-a", "connections": [{"clientIp": "10.0.0.1"}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.tcp_port, 2405);
        assert_eq!(cfg.mode, ServerMode::ConnectIfSouthConnxStarted);
        assert_eq!(cfg.cmd_recv_timeout_ms(), 5000);
        assert_eq!(cfg.redundancy_groups.len(), 1);
    }
}
