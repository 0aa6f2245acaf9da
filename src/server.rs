//! The slave gateway orchestrator: owns the component wiring, startup
//! validation, initial audits, the monitoring loop lifecycle and the
//! operation egress routing.

use crate::{
    audit::{AuditEmitter, GlobalStatus, PathStatus},
    config::{ConfigError, GatewayConfig},
    dispatcher::{SouthMonitorSet, SpontaneousDispatcher},
    link::{
        AuditSink, Clock, LinkError, MasterSession, OperationDestination, OperationParameter,
        OperationSink, PeerConnectionEvent, SlaveLink,
    },
    monitor::MonitoringLoop,
    plugin::{
        Reading, NORTH_STATUS_INIT_SOCKET_FINISHED, OP_NORTH_STATUS,
        OP_REQUEST_CONNECTION_STATUS,
    },
    points::PointTable,
    protocol::{Asdu, Cp56Time2a},
    redundancy::{PathLetter, RedundancyManager, MAX_CONNECTIONS_PER_GROUP},
    session::SessionHandler,
    tracker::CommandTracker,
};
use arc_swap::ArcSwapOption;
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("listener error: {0}")]
    Link(#[from] LinkError),
}

/// Shared state reachable from the codec handlers, the dispatcher and the
/// monitoring loop.
pub(crate) struct ServerContext {
    pub config: GatewayConfig,
    pub points: PointTable,
    pub tracker: CommandTracker,
    pub groups: RedundancyManager,
    pub audits: AuditEmitter,
    pub south: SouthMonitorSet,
    pub link: Arc<dyn SlaveLink>,
    pub clock: Arc<dyn Clock>,
    ops: ArcSwapOption<Box<dyn OperationSink>>,
}

impl ServerContext {
    pub fn register_control(&self, sink: Box<dyn OperationSink>) {
        self.ops.store(Some(Arc::new(sink)));
    }

    /// Route one egress operation to the registered callback, broadcast or
    /// addressed to the configured destination service.
    pub async fn operation(&self, operation: &str, parameters: &[OperationParameter]) -> i32 {
        let Some(sink) = self.ops.load_full() else {
            error!(
                operation,
                "no operation callback available, register_control must be called first"
            );
            return -1;
        };

        let cmd_dest = self.config.protocol.cmd_dest.as_str();
        let destination = if cmd_dest.is_empty() {
            OperationDestination::Broadcast
        } else {
            OperationDestination::Service(cmd_dest)
        };
        info!(
            operation,
            parameters = ?parameters
                .iter()
                .map(|p| format!("{}={}", p.name, p.value))
                .collect::<Vec<_>>(),
            ?destination,
            "sending operation"
        );

        let res = sink.operation(operation, parameters, destination).await;
        debug!(operation, res, "operation returned");
        res
    }

    pub async fn request_south_connection_status(&self) -> bool {
        info!("send request_connection_status operation");
        let parameters = [OperationParameter::new("desc", "request connection status")];
        self.operation(OP_REQUEST_CONNECTION_STATUS, &parameters).await > 0
    }

    pub async fn notify_init_socket_finished(&self) {
        let parameters = [OperationParameter::new(
            "north_status",
            NORTH_STATUS_INIT_SOCKET_FINISHED,
        )];
        self.operation(OP_NORTH_STATUS, &parameters).await;
    }
}

/// North-bound IEC 60870-5-104 slave endpoint.
///
/// The codec binding forwards its connection/ASDU callbacks into the `on_*`
/// methods; the host runtime delivers readings through [`Iec104Server::send`]
/// and receives operations through the registered [`OperationSink`].
pub struct Iec104Server {
    ctx: Arc<ServerContext>,
    handler: SessionHandler,
    dispatcher: SpontaneousDispatcher,
    monitor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    started: AtomicBool,
}

impl Iec104Server {
    /// Validates the configuration and wires the components. Startup errors
    /// here are fatal; the slave does not start.
    pub fn new(
        config: GatewayConfig,
        service_name: impl Into<String>,
        link: Arc<dyn SlaveLink>,
        audit_sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartError> {
        let points = PointTable::from_exchange(&config.exchange)?;
        let groups = RedundancyManager::from_config(&config.protocol.redundancy_groups);
        let audits = AuditEmitter::new(audit_sink, service_name);
        let south = SouthMonitorSet::from_assets(&config.protocol.south_monitoring);

        let ctx = Arc::new(ServerContext {
            config,
            points,
            tracker: CommandTracker::new(),
            groups,
            audits,
            south,
            link,
            clock,
            ops: ArcSwapOption::const_empty(),
        });
        info!("CS104 server initialized");

        Ok(Self {
            handler: SessionHandler::new(Arc::clone(&ctx)),
            dispatcher: SpontaneousDispatcher::new(Arc::clone(&ctx)),
            ctx,
            monitor: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Install the operation egress callback.
    pub fn register_control(&self, sink: Box<dyn OperationSink>) {
        self.ctx.register_control(sink);
        warn!("new operation callback registered");
    }

    /// Emit the initial audits, cap the codec connection count and start the
    /// monitoring loop. The listener itself is started by the loop according
    /// to the operating mode.
    pub async fn start(&self) -> Result<(), StartError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        self.send_initial_audits();

        let cancel = CancellationToken::new();
        let handle = MonitoringLoop::spawn(Arc::clone(&self.ctx), cancel.child_token());
        *self.monitor.lock().await = Some((cancel, handle));
        Ok(())
    }

    /// Stop the monitoring loop (which stops the listener) and join it.
    pub async fn stop(&self) {
        info!("IEC104 server stopping");
        if self
            .started
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some((cancel, handle)) = self.monitor.lock().await.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "monitoring task join failed");
            }
        }
        info!("IEC104 server stopped");
    }

    fn send_initial_audits(&self) {
        let overview = self.ctx.groups.overview();
        for (index, slot_count) in &overview {
            for slot in 0..*slot_count {
                let letter = if slot == 0 { PathLetter::A } else { PathLetter::B };
                self.ctx
                    .audits
                    .connection_status(*index, letter, PathStatus::Disconnected);
            }
            // paths that exist in the audit model but have no configured slot
            for slot in *slot_count..MAX_CONNECTIONS_PER_GROUP {
                let letter = if slot == 0 { PathLetter::A } else { PathLetter::B };
                self.ctx
                    .audits
                    .connection_status(*index, letter, PathStatus::Unused);
            }
        }

        // The codec must not accept more connections than configured slots;
        // surplus connections would only produce spurious connection events.
        self.ctx
            .link
            .set_max_open_connections(self.ctx.groups.total_slots());

        for index in overview.len()..self.ctx.config.protocol.max_red_groups {
            self.ctx
                .audits
                .connection_status(index, PathLetter::A, PathStatus::Unused);
            self.ctx
                .audits
                .connection_status(index, PathLetter::B, PathStatus::Unused);
        }

        self.ctx.audits.global_status(GlobalStatus::Disconnected);
    }

    /// Reading ingress from the host runtime.
    pub async fn send(&self, readings: &[Reading]) -> u32 {
        self.dispatcher.send(readings).await
    }

    // Codec-facing handlers.

    pub fn on_connection_request(&self, ip: IpAddr) -> bool {
        self.handler.on_connection_request(ip)
    }

    pub async fn on_connection_event(
        &self,
        session: &Arc<dyn MasterSession>,
        event: PeerConnectionEvent,
    ) {
        self.handler.on_connection_event(session, event).await
    }

    pub async fn on_asdu(&self, session: &Arc<dyn MasterSession>, asdu: &Asdu) -> bool {
        self.handler.on_asdu(session, asdu).await
    }

    pub async fn on_interrogation(
        &self,
        session: &Arc<dyn MasterSession>,
        asdu: &Asdu,
        qoi: u8,
    ) -> bool {
        self.handler.on_interrogation(session, asdu, qoi).await
    }

    pub async fn on_clock_sync(
        &self,
        session: &Arc<dyn MasterSession>,
        asdu: &Asdu,
        new_time: Cp56Time2a,
    ) -> bool {
        self.handler.on_clock_sync(session, asdu, new_time).await
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.ctx.config
    }
}
