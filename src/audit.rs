//! De-duplicated status-change publisher for per-path and global
//! connectivity audits.

use crate::{
    link::{AuditSeverity, AuditSink},
    redundancy::PathLetter,
};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Unused,
    Disconnected,
    Passive,
    Active,
}

impl PathStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Disconnected => "disconnected",
            Self::Passive => "passive",
            Self::Active => "active",
        }
    }

    fn severity(&self) -> AuditSeverity {
        match self {
            Self::Disconnected => AuditSeverity::Failure,
            Self::Passive | Self::Active => AuditSeverity::Success,
            Self::Unused => AuditSeverity::Information,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalStatus {
    Disconnected,
    Connected,
}

impl GlobalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
        }
    }

    fn severity(&self) -> AuditSeverity {
        match self {
            Self::Disconnected => AuditSeverity::Failure,
            Self::Connected => AuditSeverity::Success,
        }
    }
}

#[derive(Debug, Default)]
struct LastAudits {
    connection: Option<String>,
    global: Option<String>,
}

pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
    service_name: String,
    last: Mutex<LastAudits>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>, service_name: impl Into<String>) -> Self {
        Self {
            sink,
            service_name: service_name.into(),
            last: Mutex::new(LastAudits::default()),
        }
    }

    /// Per-path audit, `<service>-<group>-<letter>-<status>`. A repeat of the
    /// last emitted key is swallowed.
    pub fn connection_status(&self, group_index: usize, letter: PathLetter, status: PathStatus) {
        let key = format!(
            "{}-{}-{}-{}",
            self.service_name,
            group_index,
            letter,
            status.as_str()
        );
        {
            let mut last = self.last.lock().unwrap();
            if last.connection.as_deref() == Some(key.as_str()) {
                return;
            }
            last.connection = Some(key.clone());
        }
        debug!(key = %key, "connection status audit");
        self.sink.audit(status.severity(), &key);
    }

    /// Global audit, `<service>-<status>`, de-duplicated on the status value.
    pub fn global_status(&self, status: GlobalStatus) {
        {
            let mut last = self.last.lock().unwrap();
            if last.global.as_deref() == Some(status.as_str()) {
                return;
            }
            last.global = Some(status.as_str().to_string());
        }
        let key = format!("{}-{}", self.service_name, status.as_str());
        debug!(key = %key, "global status audit");
        self.sink.audit(status.severity(), &key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(AuditSeverity, String)>>,
    }

    impl AuditSink for RecordingSink {
        fn audit(&self, severity: AuditSeverity, key: &str) {
            self.events.lock().unwrap().push((severity, key.to_string()));
        }
    }

    #[test]
    fn identical_path_status_is_emitted_once() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = AuditEmitter::new(sink.clone(), "svc");

        emitter.connection_status(0, PathLetter::A, PathStatus::Disconnected);
        emitter.connection_status(0, PathLetter::A, PathStatus::Disconnected);
        emitter.connection_status(0, PathLetter::A, PathStatus::Passive);

        let events = sink.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                (AuditSeverity::Failure, "svc-0-A-disconnected".to_string()),
                (AuditSeverity::Success, "svc-0-A-passive".to_string()),
            ]
        );
    }

    #[test]
    fn global_dedup_is_independent_of_paths() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = AuditEmitter::new(sink.clone(), "svc");

        emitter.global_status(GlobalStatus::Disconnected);
        emitter.connection_status(1, PathLetter::B, PathStatus::Active);
        emitter.global_status(GlobalStatus::Disconnected);
        emitter.global_status(GlobalStatus::Connected);

        let events = sink.events.lock().unwrap();
        let keys: Vec<&str> = events.iter().map(|(_, k)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["svc-disconnected", "svc-1-B-active", "svc-connected"]
        );
    }

    #[test]
    fn unused_paths_are_informational() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = AuditEmitter::new(sink.clone(), "svc");
        emitter.connection_status(2, PathLetter::B, PathStatus::Unused);
        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].0, AuditSeverity::Information);
    }
}
