//! Bounded-lifetime registry of commands forwarded south and awaiting
//! ACT-CON/ACT-TERM feedback. Entries capture owned copies of everything
//! they need from the handler invocation; the lock is never held across a
//! session send.

use crate::{
    link::{MasterSession, SessionId},
    protocol::{Asdu, Cause, CommonAddr, InfoObjAddr, TypeID},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandPhase {
    WaitActCon,
    WaitActTerm,
}

pub(crate) struct OutstandingCommand {
    type_id: TypeID,
    ca: CommonAddr,
    ioa: InfoObjAddr,
    session: Arc<dyn MasterSession>,
    /// Response template retained from the received command, COT already
    /// rewritten to activation confirmation.
    template: Asdu,
    is_select: bool,
    deadline_ms: u64,
    phase: CommandPhase,
}

impl OutstandingCommand {
    pub fn new(
        type_id: TypeID,
        ca: CommonAddr,
        ioa: InfoObjAddr,
        session: Arc<dyn MasterSession>,
        template: Asdu,
        is_select: bool,
        now_ms: u64,
        exec_timeout_ms: u64,
    ) -> Self {
        Self {
            type_id,
            ca,
            ioa,
            session,
            template,
            is_select,
            deadline_ms: now_ms + exec_timeout_ms,
            phase: CommandPhase::WaitActCon,
        }
    }

    #[inline]
    fn matches(&self, type_id: TypeID, ca: CommonAddr, ioa: InfoObjAddr) -> bool {
        self.type_id == type_id && self.ca == ca && self.ioa == ioa
    }
}

#[derive(Default)]
pub(crate) struct CommandTracker {
    entries: Mutex<Vec<OutstandingCommand>>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly forwarded command. A still-open entry for the same
    /// (type, CA, IOA) from the same session is superseded.
    pub async fn append(&self, entry: OutstandingCommand) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| {
            !(e.matches(entry.type_id, entry.ca, entry.ioa)
                && e.session.id() == entry.session.id())
        });
        if entries.len() != before {
            warn!(
                ca = entry.ca,
                ioa = entry.ioa,
                type_id = entry.type_id.type_name(),
                "superseding outstanding command from the same session"
            );
        }
        entries.push(entry);
    }

    /// Remove the entry created for a command whose forwarding failed.
    pub async fn remove_matching(
        &self,
        type_id: TypeID,
        ca: CommonAddr,
        ioa: InfoObjAddr,
        session: SessionId,
    ) {
        let mut entries = self.entries.lock().await;
        entries.retain(|e| !(e.matches(type_id, ca, ioa) && e.session.id() == session));
    }

    /// Drop every entry bound to a session that left ACTIVE or closed.
    pub async fn purge_session(&self, session: SessionId) {
        let mut entries = self.entries.lock().await;
        entries.retain(|e| {
            let keep = e.session.id() != session;
            if !keep {
                warn!(
                    ca = e.ca,
                    ioa = e.ioa,
                    "removing outstanding command while waiting for feedback"
                );
            }
            keep
        });
    }

    /// Drop entries whose execution window elapsed. No response is emitted;
    /// the activation confirmation was already sent on submission.
    pub async fn sweep_expired(&self, now_ms: u64) {
        let mut entries = self.entries.lock().await;
        entries.retain(|e| {
            let keep = now_ms <= e.deadline_ms;
            if !keep {
                warn!(
                    ca = e.ca,
                    ioa = e.ioa,
                    type_id = e.type_id.type_name(),
                    "outstanding command timeout"
                );
            }
            keep
        });
    }

    /// Southern ACT-CON feedback: emit the confirmation on the originating
    /// session. Select entries are complete after this; execute entries move
    /// on to waiting for ACT-TERM.
    pub async fn confirm(
        &self,
        type_id: TypeID,
        ca: CommonAddr,
        ioa: InfoObjAddr,
        negative: bool,
    ) -> bool {
        let emission = {
            let mut entries = self.entries.lock().await;
            match entries.iter().position(|e| e.matches(type_id, ca, ioa)) {
                Some(idx) => {
                    let asdu = entries[idx].template.mirror(Cause::ActivationCon, negative);
                    let session = Arc::clone(&entries[idx].session);
                    if entries[idx].is_select {
                        info!(ca, ioa, "outstanding command sent ACT-CON (select), removing");
                        entries.remove(idx);
                    } else {
                        entries[idx].phase = CommandPhase::WaitActTerm;
                    }
                    Some((session, asdu))
                }
                None => None,
            }
        };

        match emission {
            Some((session, asdu)) => {
                if let Err(e) = session.send_asdu(asdu).await {
                    warn!(ca, ioa, error = %e, "failed to send ACT-CON");
                }
                true
            }
            None => {
                warn!(
                    ca,
                    ioa,
                    type_id = type_id.type_name(),
                    negative,
                    "received ACT-CON for unexpected outstanding command"
                );
                false
            }
        }
    }

    /// Southern ACT-TERM feedback: only entries that already saw their
    /// ACT-CON are eligible, keeping the CON-before-TERM ordering.
    pub async fn terminate(
        &self,
        type_id: TypeID,
        ca: CommonAddr,
        ioa: InfoObjAddr,
        negative: bool,
    ) -> bool {
        let emission = {
            let mut entries = self.entries.lock().await;
            match entries
                .iter()
                .position(|e| e.matches(type_id, ca, ioa) && e.phase == CommandPhase::WaitActTerm)
            {
                Some(idx) => {
                    let entry = entries.remove(idx);
                    let asdu = entry.template.mirror(Cause::ActivationTerm, negative);
                    info!(ca, ioa, "outstanding command sent ACT-TERM, removing");
                    Some((entry.session, asdu))
                }
                None => None,
            }
        };

        match emission {
            Some((session, asdu)) => {
                if let Err(e) = session.send_asdu(asdu).await {
                    warn!(ca, ioa, error = %e, "failed to send ACT-TERM");
                }
                true
            }
            None => {
                warn!(
                    ca,
                    ioa,
                    type_id = type_id.type_name(),
                    negative,
                    "received ACT-TERM for unexpected outstanding command"
                );
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        link::{LinkResult, MasterSession},
        protocol::{frame::cproc, Cause, CauseOfTransmission},
    };
    use async_trait::async_trait;
    use std::{net::IpAddr, sync::Mutex as StdMutex};

    struct RecordingSession {
        id: SessionId,
        sent: StdMutex<Vec<Asdu>>,
    }

    impl RecordingSession {
        fn new(id: SessionId) -> Arc<Self> {
            Arc::new(Self {
                id,
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn causes(&self) -> Vec<Cause> {
            self.sent.lock().unwrap().iter().map(|a| a.cause()).collect()
        }
    }

    #[async_trait]
    impl MasterSession for RecordingSession {
        fn id(&self) -> SessionId {
            self.id
        }
        fn peer_ip(&self) -> IpAddr {
            "10.0.0.1".parse().unwrap()
        }
        fn peer_port(&self) -> u16 {
            40001
        }
        async fn send_asdu(&self, asdu: Asdu) -> LinkResult<()> {
            self.sent.lock().unwrap().push(asdu);
            Ok(())
        }
    }

    fn command_template(select: bool) -> Asdu {
        let cot = CauseOfTransmission::new(false, false, Cause::ActivationCon);
        cproc::single_cmd(
            TypeID::C_SC_NA_1,
            cot,
            0,
            41,
            cproc::SingleCommandInfo::new(2001, true, select),
        )
        .unwrap()
    }

    fn entry(
        session: &Arc<RecordingSession>,
        select: bool,
        now_ms: u64,
        timeout_ms: u64,
    ) -> OutstandingCommand {
        OutstandingCommand::new(
            TypeID::C_SC_NA_1,
            41,
            2001,
            session.clone() as Arc<dyn MasterSession>,
            command_template(select),
            select,
            now_ms,
            timeout_ms,
        )
    }

    #[tokio::test]
    async fn select_completes_on_act_con() {
        let tracker = CommandTracker::new();
        let session = RecordingSession::new(1);
        tracker.append(entry(&session, true, 0, 10_000)).await;

        assert!(tracker.confirm(TypeID::C_SC_NA_1, 41, 2001, false).await);
        assert_eq!(tracker.len().await, 0);
        assert_eq!(session.causes(), vec![Cause::ActivationCon]);
        assert!(!session.sent.lock().unwrap()[0].is_negative());
    }

    #[tokio::test]
    async fn execute_needs_con_before_term() {
        let tracker = CommandTracker::new();
        let session = RecordingSession::new(1);
        tracker.append(entry(&session, false, 0, 10_000)).await;

        // out-of-order termination is refused
        assert!(!tracker.terminate(TypeID::C_SC_NA_1, 41, 2001, false).await);
        assert_eq!(tracker.len().await, 1);

        assert!(tracker.confirm(TypeID::C_SC_NA_1, 41, 2001, false).await);
        assert_eq!(tracker.len().await, 1);
        assert!(tracker.terminate(TypeID::C_SC_NA_1, 41, 2001, false).await);
        assert_eq!(tracker.len().await, 0);
        assert_eq!(
            session.causes(),
            vec![Cause::ActivationCon, Cause::ActivationTerm]
        );
    }

    #[tokio::test]
    async fn negative_feedback_is_propagated() {
        let tracker = CommandTracker::new();
        let session = RecordingSession::new(9);
        tracker.append(entry(&session, false, 0, 10_000)).await;

        tracker.confirm(TypeID::C_SC_NA_1, 41, 2001, true).await;
        assert!(session.sent.lock().unwrap()[0].is_negative());
    }

    #[tokio::test]
    async fn sweep_drops_expired_without_response() {
        let tracker = CommandTracker::new();
        let session = RecordingSession::new(1);
        tracker.append(entry(&session, false, 1_000, 5_000)).await;

        tracker.sweep_expired(5_500).await;
        assert_eq!(tracker.len().await, 1);

        tracker.sweep_expired(6_001).await;
        assert_eq!(tracker.len().await, 0);
        assert!(session.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_session_removes_only_its_entries() {
        let tracker = CommandTracker::new();
        let one = RecordingSession::new(1);
        let two = RecordingSession::new(2);
        tracker.append(entry(&one, false, 0, 10_000)).await;

        let mut other = entry(&two, false, 0, 10_000);
        other.ioa = 2002;
        tracker.append(other).await;

        tracker.purge_session(1).await;
        assert_eq!(tracker.len().await, 1);
        assert!(tracker.confirm(TypeID::C_SC_NA_1, 41, 2002, false).await);
        assert!(!tracker.confirm(TypeID::C_SC_NA_1, 41, 2001, false).await);
    }

    #[tokio::test]
    async fn same_session_duplicate_is_superseded() {
        let tracker = CommandTracker::new();
        let session = RecordingSession::new(1);
        tracker.append(entry(&session, false, 0, 10_000)).await;
        tracker.append(entry(&session, false, 100, 10_000)).await;
        assert_eq!(tracker.len().await, 1);
    }
}
