//! Per-connection protocol handling: admission, connection events, clock
//! synchronization, general interrogation and the command pipeline. The
//! codec binding calls into [`SessionHandler`] from its networking tasks.

use crate::{
    link::{MasterSession, OperationParameter, PeerConnectionEvent},
    points::{MeasuredValue, MonitoredPoint},
    plugin::OP_COMMAND,
    protocol::{
        frame::mproc::{
            self, element_size, DoublePointInfo, MeasuredValueFloatInfo, MeasuredValueNormalInfo,
            MeasuredValueScaledInfo, SinglePointInfo, StepPositionInfo,
        },
        Asdu, Cause, CauseOfTransmission, CommonAddr, Cp56Time2a, Error as FrameError,
        InfoObjAddr, TypeID, IDENTIFIER_SIZE, QOI_GROUP_MAX, QOI_STATION,
    },
    server::ServerContext,
    tracker::OutstandingCommand,
    audit::{GlobalStatus, PathStatus},
};
use bytes::{BufMut, BytesMut};
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, error, info, warn};

pub(crate) struct SessionHandler {
    ctx: Arc<ServerContext>,
}

impl SessionHandler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Connection admission: the peer must belong to a redundancy group with
    /// a free slot. The codec additionally caps total open connections.
    pub fn on_connection_request(&self, ip: IpAddr) -> bool {
        info!(%ip, "new connection request");
        let admitted = self.ctx.groups.admit(ip);
        if !admitted {
            warn!(%ip, "no redundancy group slot for peer, refusing connection");
        }
        admitted
    }

    pub async fn on_connection_event(
        &self,
        session: &Arc<dyn MasterSession>,
        event: PeerConnectionEvent,
    ) {
        let ip = session.peer_ip();
        let port = session.peer_port();
        info!(?event, %ip, port, "connection event");

        let Some(slot) = self.ctx.groups.bind_or_lookup(ip, port) else {
            error!(%ip, port, "redundancy group connection not found");
            return;
        };

        // Slot state first, outstanding-command purge second; audits are the
        // final action of the event handler.
        match event {
            PeerConnectionEvent::Opened => {
                self.ctx
                    .audits
                    .connection_status(slot.group_index, slot.letter, PathStatus::Passive);
            }
            PeerConnectionEvent::Activated => {
                self.ctx.groups.set_active(ip, port, true);
                self.ctx
                    .audits
                    .connection_status(slot.group_index, slot.letter, PathStatus::Active);
                self.ctx.audits.global_status(GlobalStatus::Connected);
            }
            PeerConnectionEvent::Deactivated => {
                self.ctx.groups.set_active(ip, port, false);
                self.ctx.tracker.purge_session(session.id()).await;
                self.ctx
                    .audits
                    .connection_status(slot.group_index, slot.letter, PathStatus::Passive);
            }
            PeerConnectionEvent::Closed => {
                self.ctx.groups.release(ip, port);
                self.ctx.tracker.purge_session(session.id()).await;
                self.ctx
                    .audits
                    .connection_status(slot.group_index, slot.letter, PathStatus::Disconnected);
                // When another connection can take over, the codec switches it
                // before this close lands. Nothing left means global loss.
                if !self.ctx.groups.any_connection_established() {
                    self.ctx.audits.global_status(GlobalStatus::Disconnected);
                }
            }
        }
    }

    /// Clock synchronization (C_CS_NA_1).
    pub async fn on_clock_sync(
        &self,
        session: &Arc<dyn MasterSession>,
        asdu: &Asdu,
        new_time: Cp56Time2a,
    ) -> bool {
        info!(time_ms = new_time.to_ms(), "received clock synchronization command");

        let response = if self.ctx.config.protocol.time_sync {
            if self.ctx.clock.apply_time_sync(new_time.to_ms()) {
                info!("time sync success");
            } else {
                error!("time sync failed");
            }

            // confirm with the committed wall-clock value
            let committed = Cp56Time2a::from_ms(self.ctx.clock.now_ms());
            let mut response = asdu.mirror(Cause::ActivationCon, false);
            let mut buf = BytesMut::with_capacity(3 + 7);
            buf.put_uint_le(0, 3);
            buf.extend_from_slice(&committed.encode());
            response.raw = buf.freeze();
            response
        } else {
            info!("time sync disabled, ignoring time sync command");
            asdu.mirror(Cause::ActivationCon, true)
        };

        if let Err(e) = session.send_asdu(response).await {
            warn!(error = %e, "failed to send clock sync response");
        }
        true
    }

    /// General interrogation (C_IC_NA_1).
    pub async fn on_interrogation(
        &self,
        session: &Arc<dyn MasterSession>,
        asdu: &Asdu,
        qoi: u8,
    ) -> bool {
        info!(qoi, "received interrogation");
        let ca = asdu.identifier.common_addr;

        if !(QOI_STATION..=QOI_GROUP_MAX).contains(&qoi) {
            debug!(qoi, "interrogation group out of range [20..36]");
            self.send(session, asdu.mirror(Cause::ActivationCon, true)).await;
            return true;
        }

        if ca == self.ctx.config.protocol.broadcast_ca() {
            debug!(ca, "broadcast CA, interrogating every known station");
            for ca in self.ctx.points.ca_list() {
                self.send_interrogation_response(session, asdu, ca, qoi).await;
            }
        } else if !self.ctx.points.has_ca(ca) {
            debug!(ca, "no exchange definition for CA");
            self.send(session, asdu.mirror(Cause::UnknownCA, true)).await;
        } else {
            self.send_interrogation_response(session, asdu, ca, qoi).await;
        }
        true
    }

    /// ACT-CON, the selected points packed greedily into ASDUs, ACT-TERM.
    async fn send_interrogation_response(
        &self,
        session: &Arc<dyn MasterSession>,
        request: &Asdu,
        ca: CommonAddr,
        qoi: u8,
    ) {
        info!(ca, qoi, "sending interrogation response");

        let mut act_con = request.mirror(Cause::ActivationCon, false);
        act_con.identifier.common_addr = ca;
        self.send(session, act_con).await;

        let budget = self
            .ctx
            .config
            .protocol
            .max_asdu_size()
            .saturating_sub(IDENTIFIER_SIZE);
        let mut assembler = GiAssembler::new(request.identifier.orig_addr, ca, budget);
        for (ioa, point) in self.ctx.points.snapshot_ca(ca) {
            if !point.in_gi_group(qoi) {
                debug!(ioa, "skipping point outside interrogation group");
                continue;
            }
            if let Some(flushed) = assembler.push(ioa, &point) {
                self.send(session, flushed).await;
            }
        }
        if let Some(tail) = assembler.finish() {
            self.send(session, tail).await;
        }

        let mut act_term = request.mirror(Cause::ActivationTerm, false);
        act_term.identifier.common_addr = ca;
        self.send(session, act_term).await;
    }

    /// Command ASDUs; everything outside the 12 supported command types is
    /// ignored without a response.
    pub async fn on_asdu(&self, session: &Arc<dyn MasterSession>, asdu: &Asdu) -> bool {
        let type_id = asdu.identifier.type_id;
        if !type_id.is_command() {
            warn!(
                type_id = type_id.type_name(),
                "unsupported command type, ignoring"
            );
            return false;
        }

        info!(type_id = type_id.type_name(), "received command");
        if let Some(response) = self.validate_command(session, asdu).await {
            debug!(type_id = type_id.type_name(), "sending command response");
            self.send(session, response).await;
        }
        true
    }

    /// Runs the validation pipeline. `Some` carries the response to send now;
    /// `None` means either a silent drop or a handshake completed later by
    /// southern feedback.
    async fn validate_command(
        &self,
        session: &Arc<dyn MasterSession>,
        asdu: &Asdu,
    ) -> Option<Asdu> {
        let cfg = &self.ctx.config.protocol;
        let type_id = asdu.identifier.type_id;
        let ca = asdu.identifier.common_addr;
        let oa = asdu.identifier.orig_addr;

        if !self.ctx.south.any_started() {
            warn!(
                type_id = type_id.type_name(),
                "command received while south plugin is not connected, rejecting"
            );
            return Some(asdu.mirror(Cause::ActivationCon, true));
        }

        if asdu.cause() != Cause::Activation {
            warn!(
                type_id = type_id.type_name(),
                cause = ?asdu.cause(),
                "unexpected COT for command"
            );
            return Some(asdu.mirror(Cause::UnknownCOT, true));
        }

        let cmd = match DecodedCommand::decode(asdu) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(
                    type_id = type_id.type_name(),
                    error = %e,
                    "information object missing or undecodable"
                );
                return Some(asdu.mirror(Cause::UnknownTypeID, true));
            }
        };

        if !self.ctx.points.has_ca(ca) {
            warn!(type_id = type_id.type_name(), ca, "unknown CA");
            return Some(asdu.mirror(Cause::UnknownCA, true));
        }

        if !cfg.is_originator_allowed(oa) {
            warn!(type_id = type_id.type_name(), ca, oa, "originator address not allowed");
            return Some(asdu.mirror(Cause::ActivationCon, true));
        }

        if !self.ctx.points.entry_exists(ca, cmd.ioa) {
            warn!(type_id = type_id.type_name(), ca, ioa = cmd.ioa, "unknown IOA");
            return Some(asdu.mirror(Cause::UnknownIOA, true));
        }

        if !self.ctx.points.command_allows(ca, cmd.ioa, type_id) {
            warn!(
                type_id = type_id.type_name(),
                ca,
                ioa = cmd.ioa,
                "command type not allowed for this point"
            );
            return Some(asdu.mirror(Cause::UnknownTypeID, true));
        }

        if type_id.carries_time() {
            if !cfg.accept_cmd_with_time {
                warn!(
                    type_id = type_id.type_name(),
                    ca,
                    ioa = cmd.ioa,
                    "commands with timestamp are not allowed"
                );
                return Some(asdu.mirror(Cause::UnknownTypeID, true));
            }
            if !self.command_time_valid(&cmd) {
                // out-of-window timestamps are dropped without any response
                warn!(
                    type_id = type_id.type_name(),
                    ca,
                    ioa = cmd.ioa,
                    "invalid command timestamp, ignoring"
                );
                return None;
            }
        } else if !cfg.accept_cmd_without_time {
            warn!(
                type_id = type_id.type_name(),
                ca,
                ioa = cmd.ioa,
                "commands without timestamp are not allowed"
            );
            return Some(asdu.mirror(Cause::UnknownTypeID, true));
        }

        // Accepted: register the handshake, then forward south. The entry is
        // appended before the callback so feedback can never race past it.
        let template = asdu.mirror(Cause::ActivationCon, false);
        self.ctx
            .tracker
            .append(OutstandingCommand::new(
                type_id,
                ca,
                cmd.ioa,
                Arc::clone(session),
                template.clone(),
                cmd.select,
                self.ctx.clock.now_ms(),
                cfg.cmd_exec_timeout_ms(),
            ))
            .await;

        let parameters = cmd.parameters(&template);
        let res = self.ctx.operation(OP_COMMAND, &parameters).await;
        if res <= 0 {
            warn!(
                type_id = type_id.type_name(),
                ca,
                ioa = cmd.ioa,
                "failed to forward command, sending negative response"
            );
            self.ctx
                .tracker
                .remove_matching(type_id, ca, cmd.ioa, session.id())
                .await;
            return Some(asdu.mirror(Cause::ActivationCon, true));
        }

        // ACT-CON follows on southern feedback
        None
    }

    fn command_time_valid(&self, cmd: &DecodedCommand) -> bool {
        let window_ms = self.ctx.config.protocol.cmd_recv_timeout_ms();
        if window_ms == 0 {
            return true;
        }
        let Some(ts) = cmd.timestamp else {
            return false;
        };
        self.ctx.clock.now_ms().abs_diff(ts.to_ms()) <= window_ms
    }

    async fn send(&self, session: &Arc<dyn MasterSession>, asdu: Asdu) {
        if let Err(e) = session.send_asdu(asdu).await {
            warn!(error = %e, "failed to send ASDU on session");
        }
    }
}

/// Normalized view of a received command information object.
struct DecodedCommand {
    ioa: InfoObjAddr,
    select: bool,
    value: String,
    timestamp: Option<Cp56Time2a>,
}

impl DecodedCommand {
    fn decode(asdu: &Asdu) -> Result<Self, FrameError> {
        Ok(match asdu.identifier.type_id {
            TypeID::C_SC_NA_1 | TypeID::C_SC_TA_1 => {
                let cmd = asdu.get_single_cmd()?;
                Self {
                    ioa: cmd.ioa,
                    select: cmd.is_select(),
                    value: if cmd.state() { "1" } else { "0" }.to_string(),
                    timestamp: cmd.time,
                }
            }
            TypeID::C_DC_NA_1 | TypeID::C_DC_TA_1 => {
                let cmd = asdu.get_double_cmd()?;
                Self {
                    ioa: cmd.ioa,
                    select: cmd.is_select(),
                    value: cmd.state().to_string(),
                    timestamp: cmd.time,
                }
            }
            TypeID::C_RC_NA_1 | TypeID::C_RC_TA_1 => {
                let cmd = asdu.get_step_cmd()?;
                Self {
                    ioa: cmd.ioa,
                    select: cmd.is_select(),
                    value: cmd.state().to_string(),
                    timestamp: cmd.time,
                }
            }
            TypeID::C_SE_NA_1 | TypeID::C_SE_TA_1 => {
                let cmd = asdu.get_set_point_normal_cmd()?;
                Self {
                    ioa: cmd.ioa,
                    select: false,
                    value: cmd.value().to_string(),
                    timestamp: cmd.time,
                }
            }
            TypeID::C_SE_NB_1 | TypeID::C_SE_TB_1 => {
                let cmd = asdu.get_set_point_scaled_cmd()?;
                Self {
                    ioa: cmd.ioa,
                    select: false,
                    value: cmd.sva.to_string(),
                    timestamp: cmd.time,
                }
            }
            TypeID::C_SE_NC_1 | TypeID::C_SE_TC_1 => {
                let cmd = asdu.get_set_point_float_cmd()?;
                Self {
                    ioa: cmd.ioa,
                    select: false,
                    value: cmd.r.to_string(),
                    timestamp: cmd.time,
                }
            }
            other => return Err(FrameError::TypeIdMismatch(other)),
        })
    }

    /// The normalized parameter set forwarded with `IEC104Command`, built
    /// from the confirmation template (COT already activation-con).
    fn parameters(&self, template: &Asdu) -> Vec<OperationParameter> {
        vec![
            OperationParameter::new("co_type", template.identifier.type_id.type_name()),
            OperationParameter::new("co_ca", template.identifier.common_addr.to_string()),
            OperationParameter::new("co_ioa", self.ioa.to_string()),
            OperationParameter::new("co_cot", (template.identifier.cot.raw() & 0x3f).to_string()),
            OperationParameter::new("co_negative", if template.is_negative() { "1" } else { "0" }),
            OperationParameter::new("co_se", if self.select { "1" } else { "0" }),
            OperationParameter::new("co_test", if template.is_test() { "1" } else { "0" }),
            OperationParameter::new(
                "co_ts",
                self.timestamp
                    .map(|ts| ts.to_ms().to_string())
                    .unwrap_or_default(),
            ),
            OperationParameter::new("co_value", self.value.clone()),
        ]
    }
}

/// Greedy packer for interrogation responses. One ASDU holds objects of one
/// type; a type change or a full payload flushes the batch.
struct GiAssembler {
    orig_addr: u8,
    ca: CommonAddr,
    budget: usize,
    used: usize,
    batch: GiBatch,
}

enum GiBatch {
    Empty,
    Single(Vec<SinglePointInfo>),
    Double(Vec<DoublePointInfo>),
    Step(Vec<StepPositionInfo>),
    Normalized(Vec<MeasuredValueNormalInfo>),
    Scaled(Vec<MeasuredValueScaledInfo>),
    Short(Vec<MeasuredValueFloatInfo>),
}

impl GiBatch {
    fn type_id(&self) -> Option<TypeID> {
        Some(match self {
            Self::Empty => return None,
            Self::Single(_) => TypeID::M_SP_NA_1,
            Self::Double(_) => TypeID::M_DP_NA_1,
            Self::Step(_) => TypeID::M_ST_NA_1,
            Self::Normalized(_) => TypeID::M_ME_NA_1,
            Self::Scaled(_) => TypeID::M_ME_NB_1,
            Self::Short(_) => TypeID::M_ME_NC_1,
        })
    }

    fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Step(v) => v.len(),
            Self::Normalized(v) => v.len(),
            Self::Scaled(v) => v.len(),
            Self::Short(v) => v.len(),
        }
    }
}

impl GiAssembler {
    fn new(orig_addr: u8, ca: CommonAddr, budget: usize) -> Self {
        Self {
            orig_addr,
            ca,
            budget,
            used: 0,
            batch: GiBatch::Empty,
        }
    }

    /// Append one point; returns a finished ASDU when the running batch had
    /// to be flushed first.
    fn push(&mut self, ioa: InfoObjAddr, point: &MonitoredPoint) -> Option<Asdu> {
        let type_id = point.family.plain_type();
        let size = element_size(type_id).unwrap_or(self.budget);

        let mut flushed = None;
        let fits = self.used + size <= self.budget && self.batch.len() < 127;
        if self.batch.type_id() != Some(type_id) || !fits {
            flushed = self.take();
        }
        self.append(ioa, point);
        self.used += size;
        flushed
    }

    fn finish(mut self) -> Option<Asdu> {
        self.take()
    }

    fn append(&mut self, ioa: InfoObjAddr, point: &MonitoredPoint) {
        let quality = point.quality;
        match point.value {
            MeasuredValue::Single(v) => {
                let info = SinglePointInfo::new(ioa, v, quality, None);
                match &mut self.batch {
                    GiBatch::Single(infos) => infos.push(info),
                    batch => *batch = GiBatch::Single(vec![info]),
                }
            }
            MeasuredValue::Double(v) => {
                let info = DoublePointInfo::new(ioa, v, quality, None);
                match &mut self.batch {
                    GiBatch::Double(infos) => infos.push(info),
                    batch => *batch = GiBatch::Double(vec![info]),
                }
            }
            MeasuredValue::Step {
                position,
                transient,
            } => {
                let info = StepPositionInfo::new(ioa, position, transient, quality, None);
                match &mut self.batch {
                    GiBatch::Step(infos) => infos.push(info),
                    batch => *batch = GiBatch::Step(vec![info]),
                }
            }
            MeasuredValue::Normalized(v) => {
                let info = MeasuredValueNormalInfo::from_normalized(ioa, v, quality, None);
                match &mut self.batch {
                    GiBatch::Normalized(infos) => infos.push(info),
                    batch => *batch = GiBatch::Normalized(vec![info]),
                }
            }
            MeasuredValue::Scaled(v) => {
                let info = MeasuredValueScaledInfo::new(ioa, v, quality, None);
                match &mut self.batch {
                    GiBatch::Scaled(infos) => infos.push(info),
                    batch => *batch = GiBatch::Scaled(vec![info]),
                }
            }
            MeasuredValue::Short(v) => {
                let info = MeasuredValueFloatInfo::new(ioa, v, quality, None);
                match &mut self.batch {
                    GiBatch::Short(infos) => infos.push(info),
                    batch => *batch = GiBatch::Short(vec![info]),
                }
            }
        }
    }

    fn take(&mut self) -> Option<Asdu> {
        let cot = CauseOfTransmission::new(false, false, Cause::InterrogatedByStation);
        let batch = std::mem::replace(&mut self.batch, GiBatch::Empty);
        self.used = 0;
        let encoded = match batch {
            GiBatch::Empty => return None,
            GiBatch::Single(infos) => {
                mproc::single(TypeID::M_SP_NA_1, cot, self.orig_addr, self.ca, infos)
            }
            GiBatch::Double(infos) => {
                mproc::double(TypeID::M_DP_NA_1, cot, self.orig_addr, self.ca, infos)
            }
            GiBatch::Step(infos) => {
                mproc::step_position(TypeID::M_ST_NA_1, cot, self.orig_addr, self.ca, infos)
            }
            GiBatch::Normalized(infos) => {
                mproc::measured_normalized(TypeID::M_ME_NA_1, cot, self.orig_addr, self.ca, infos)
            }
            GiBatch::Scaled(infos) => {
                mproc::measured_scaled(TypeID::M_ME_NB_1, cot, self.orig_addr, self.ca, infos)
            }
            GiBatch::Short(infos) => {
                mproc::measured_short(TypeID::M_ME_NC_1, cot, self.orig_addr, self.ca, infos)
            }
        };
        match encoded {
            Ok(asdu) => Some(asdu),
            Err(e) => {
                error!(error = %e, "failed to encode interrogation ASDU");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::PointFamily;

    fn monitored(value: MeasuredValue, quality: u8) -> MonitoredPoint {
        MonitoredPoint {
            family: value.family(),
            value,
            quality,
            timestamp: None,
            gi_groups: 1,
        }
    }

    #[test]
    fn assembler_flushes_on_type_change() {
        let mut assembler = GiAssembler::new(0, 41, 240);
        assert!(assembler
            .push(1, &monitored(MeasuredValue::Single(true), 0))
            .is_none());
        assert!(assembler
            .push(2, &monitored(MeasuredValue::Single(false), 0))
            .is_none());

        let flushed = assembler
            .push(3, &monitored(MeasuredValue::Scaled(7), 0))
            .expect("type change flushes the single-point batch");
        assert_eq!(flushed.identifier.type_id, TypeID::M_SP_NA_1);
        assert_eq!(flushed.get_single_point().unwrap().len(), 2);

        let tail = assembler.finish().expect("scaled batch pending");
        assert_eq!(tail.identifier.type_id, TypeID::M_ME_NB_1);
    }

    #[test]
    fn assembler_flushes_on_size_overflow() {
        // room for exactly two single points
        let mut assembler = GiAssembler::new(0, 1, 8);
        assert!(assembler
            .push(1, &monitored(MeasuredValue::Single(true), 0))
            .is_none());
        assert!(assembler
            .push(2, &monitored(MeasuredValue::Single(true), 0))
            .is_none());
        let flushed = assembler
            .push(3, &monitored(MeasuredValue::Single(true), 0))
            .expect("third point exceeds the payload budget");
        assert_eq!(flushed.get_single_point().unwrap().len(), 2);

        let tail = assembler.finish().unwrap();
        assert_eq!(tail.get_single_point().unwrap().len(), 1);
    }

    #[test]
    fn plain_types_used_for_responses() {
        let p = monitored(MeasuredValue::Short(1.5), 0);
        assert_eq!(p.family, PointFamily::MvShort);
        assert_eq!(p.family.plain_type(), TypeID::M_ME_NC_1);
    }
}
