//! Reading ingress: classifies datapoints from the host runtime, keeps the
//! south-plugin monitors current, correlates command feedback and converts
//! southern readings into queued spontaneous ASDUs.

use crate::{
    plugin::{Datapoint, DatapointValue, Reading, DP_DATA_OBJECT, DP_SOUTH_EVENT},
    points::{MeasuredValue, MonitoredPoint, PointFamily},
    protocol::{
        frame::{
            asdu::cause_from_u8,
            mproc::{
                self, DoublePointInfo, MeasuredValueFloatInfo, MeasuredValueNormalInfo,
                MeasuredValueScaledInfo, SinglePointInfo, StepPositionInfo, QUALITY_BLOCKED,
                QUALITY_GOOD, QUALITY_INVALID, QUALITY_NON_TOPICAL, QUALITY_OVERFLOW,
                QUALITY_SUBSTITUTED,
            },
        },
        Asdu, Cause, CauseOfTransmission, CommonAddr, Cp56Time2a, Error as FrameError,
        InfoObjAddr, TypeID,
    },
    server::ServerContext,
};
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use tracing::{info, warn};

/// Connection state reported by a monitored south plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected = 0,
    Started = 1,
}

impl ConnectionStatus {
    fn from_label(label: &str) -> Self {
        match label {
            "started" => Self::Started,
            _ => Self::NotConnected,
        }
    }
}

/// General-interrogation progress reported by a monitored south plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiStatus {
    Idle = 0,
    Started = 1,
    InProgress = 2,
    Failed = 3,
    Finished = 4,
}

impl GiStatus {
    fn from_label(label: &str) -> Self {
        match label {
            "started" => Self::Started,
            "in progress" => Self::InProgress,
            "failed" => Self::Failed,
            "finished" => Self::Finished,
            _ => Self::Idle,
        }
    }
}

/// Lock-free status cell per monitored upstream asset.
#[derive(Debug)]
pub(crate) struct SouthMonitor {
    asset_name: String,
    connx: AtomicU8,
    gi: AtomicU8,
}

impl SouthMonitor {
    fn new(asset_name: String) -> Self {
        Self {
            asset_name,
            connx: AtomicU8::new(ConnectionStatus::NotConnected as u8),
            gi: AtomicU8::new(GiStatus::Idle as u8),
        }
    }

    pub fn connx_status(&self) -> ConnectionStatus {
        match self.connx.load(Ordering::Acquire) {
            1 => ConnectionStatus::Started,
            _ => ConnectionStatus::NotConnected,
        }
    }

    fn set_connx_status(&self, status: ConnectionStatus) {
        self.connx.store(status as u8, Ordering::Release);
    }

    pub fn gi_status(&self) -> GiStatus {
        match self.gi.load(Ordering::Acquire) {
            1 => GiStatus::Started,
            2 => GiStatus::InProgress,
            3 => GiStatus::Failed,
            4 => GiStatus::Finished,
            _ => GiStatus::Idle,
        }
    }

    fn set_gi_status(&self, status: GiStatus) {
        self.gi.store(status as u8, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub(crate) struct SouthMonitorSet {
    monitors: Vec<SouthMonitor>,
}

impl SouthMonitorSet {
    pub fn from_assets(assets: &[String]) -> Self {
        Self {
            monitors: assets
                .iter()
                .map(|asset| SouthMonitor::new(asset.clone()))
                .collect(),
        }
    }

    pub fn find(&self, asset_name: &str) -> Option<&SouthMonitor> {
        self.monitors.iter().find(|m| m.asset_name == asset_name)
    }

    /// True when any monitored south plugin reports STARTED.
    pub fn any_started(&self) -> bool {
        self.monitors
            .iter()
            .any(|m| m.connx_status() == ConnectionStatus::Started)
    }

    pub fn all_disconnected(&self) -> bool {
        !self.any_started()
    }
}

pub(crate) struct SpontaneousDispatcher {
    ctx: Arc<ServerContext>,
}

impl SpontaneousDispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Process one batch in submission order. Returns the number of readings
    /// handled.
    pub async fn send(&self, readings: &[Reading]) -> u32 {
        let mut processed = 0;
        for reading in readings {
            for dp in &reading.datapoints {
                match dp.name.as_str() {
                    DP_SOUTH_EVENT => self.handle_south_event(&reading.asset_name, &dp.value),
                    DP_DATA_OBJECT => self.handle_data_object(&dp.value).await,
                    other => {
                        info!(name = other, "unknown datapoint name, ignored");
                    }
                }
            }
            processed += 1;
        }
        processed
    }

    fn handle_south_event(&self, asset_name: &str, value: &DatapointValue) {
        info!(asset_name, "process south_event");
        let Some(monitor) = self.ctx.south.find(asset_name) else {
            warn!(asset_name, "south_event with unknown asset name, ignored");
            return;
        };
        let Some(bag) = value.as_nested() else {
            warn!(asset_name, "south_event carries no attribute bag, ignored");
            return;
        };

        for dp in bag {
            match (dp.name.as_str(), dp.value.as_str()) {
                ("connx_status", Some(label)) => {
                    let status = ConnectionStatus::from_label(label);
                    info!(asset_name, label, "south connection status changed");
                    monitor.set_connx_status(status);
                }
                ("gi_status", Some(label)) => {
                    let status = GiStatus::from_label(label);
                    info!(asset_name, label, "south gi status changed");
                    monitor.set_gi_status(status);
                }
                _ => {}
            }
        }
    }

    async fn handle_data_object(&self, value: &DatapointValue) {
        let Some(bag) = value.as_nested() else {
            warn!("data_object carries no attribute bag, ignored");
            return;
        };
        if !self.ctx.link.is_running() {
            warn!("failed to send data: server not running");
            return;
        }

        let obj = DataObject::from_bag(bag);

        if obj.cot == Some(Cause::ActivationCon) {
            if let (Some(type_id), Some(ca), Some(ioa)) = (obj.type_id, obj.ca, obj.ioa) {
                self.ctx
                    .tracker
                    .confirm(type_id, ca, ioa, obj.negative)
                    .await;
            }
            return;
        }
        if obj.cot == Some(Cause::ActivationTerm) {
            if let (Some(type_id), Some(ca), Some(ioa)) = (obj.type_id, obj.ca, obj.ioa) {
                self.ctx
                    .tracker
                    .terminate(type_id, ca, ioa, obj.negative)
                    .await;
            }
            return;
        }

        let (Some(ca), Some(ioa), Some(cot), Some(type_id)) =
            (obj.ca, obj.ioa, obj.cot, obj.type_id)
        else {
            info!(
                ca = ?obj.ca,
                ioa = ?obj.ioa,
                cot = ?obj.cot,
                "data_object ignored, identification incomplete"
            );
            return;
        };

        let timestamp = if type_id.carries_time() {
            Some(obj.time_tag().unwrap_or_else(|| {
                Cp56Time2a::from_ms(self.ctx.clock.now_ms())
            }))
        } else {
            None
        };
        let value = obj
            .value
            .as_ref()
            .and_then(|v| decode_measured_value(type_id, v));

        let Some(updated) =
            self.ctx
                .points
                .update(ca, ioa, type_id, value, obj.quality, timestamp)
        else {
            warn!(
                ca,
                ioa,
                type_id = type_id.type_name(),
                "data point not found or type not expected"
            );
            return;
        };

        match cot {
            Cause::Periodic
            | Cause::Spontaneous
            | Cause::ReturnInfoRemote
            | Cause::ReturnInfoLocal
            | Cause::Background => {
                info!(ca, ioa, type_id = type_id.type_name(), "sending data point");
                match spontaneous_asdu(type_id, cot, ca, ioa, &updated) {
                    Ok(asdu) => {
                        if let Err(e) = self.ctx.link.enqueue_spontaneous(asdu).await {
                            warn!(ca, ioa, error = %e, "failed to enqueue spontaneous ASDU");
                        }
                    }
                    Err(e) => {
                        warn!(ca, ioa, error = %e, "failed to encode spontaneous ASDU");
                    }
                }
            }
            other => {
                info!(ca, ioa, cot = ?other, "data point has unhandled COT, ignored");
            }
        }
    }
}

/// Decoded `data_object` attribute bag.
#[derive(Debug, Default)]
struct DataObject {
    ca: Option<CommonAddr>,
    ioa: Option<InfoObjAddr>,
    cot: Option<Cause>,
    type_id: Option<TypeID>,
    value: Option<DatapointValue>,
    negative: bool,
    quality: u8,
    ts_ms: Option<u64>,
    ts_iv: bool,
    ts_su: bool,
    ts_sub: bool,
}

impl DataObject {
    fn from_bag(bag: &[Datapoint]) -> Self {
        let mut obj = Self {
            quality: QUALITY_GOOD,
            ..Self::default()
        };
        for dp in bag {
            let value = &dp.value;
            match dp.name.as_str() {
                "do_ca" => obj.ca = value.as_int().map(|v| v as CommonAddr),
                "do_ioa" => obj.ioa = value.as_int().map(|v| v as InfoObjAddr),
                "do_cot" => obj.cot = value.as_int().and_then(|v| cause_from_u8(v as u8)),
                "do_type" => {
                    obj.type_id = value.as_str().and_then(TypeID::from_type_name);
                    if obj.type_id.is_none() {
                        warn!(type_name = ?value.as_str(), "unknown data_object type name");
                    }
                }
                "do_value" => obj.value = Some(value.clone()),
                "do_negative" => obj.negative = value.as_flag(),
                "do_quality_iv" => {
                    if value.as_flag() {
                        obj.quality |= QUALITY_INVALID;
                    }
                }
                "do_quality_bl" => {
                    if value.as_flag() {
                        obj.quality |= QUALITY_BLOCKED;
                    }
                }
                "do_quality_ov" => {
                    if value.as_flag() {
                        obj.quality |= QUALITY_OVERFLOW;
                    }
                }
                "do_quality_sb" => {
                    if value.as_flag() {
                        obj.quality |= QUALITY_SUBSTITUTED;
                    }
                }
                "do_quality_nt" => {
                    if value.as_flag() {
                        obj.quality |= QUALITY_NON_TOPICAL;
                    }
                }
                "do_ts" => obj.ts_ms = value.as_int().map(|v| v.max(0) as u64),
                "do_ts_iv" => obj.ts_iv = value.as_flag(),
                "do_ts_su" => obj.ts_su = value.as_flag(),
                "do_ts_sub" => obj.ts_sub = value.as_flag(),
                _ => {}
            }
        }
        obj
    }

    fn time_tag(&self) -> Option<Cp56Time2a> {
        self.ts_ms.map(|ms| {
            let mut tag = Cp56Time2a::from_ms(ms);
            tag.invalid = self.ts_iv;
            tag.summer_time = self.ts_su;
            tag.substituted = self.ts_sub;
            tag
        })
    }
}

/// Reading value to point value, variant chosen by the reported type.
fn decode_measured_value(type_id: TypeID, value: &DatapointValue) -> Option<MeasuredValue> {
    let family = PointFamily::of(type_id)?;
    match family {
        PointFamily::Single => value.as_int().map(|v| MeasuredValue::Single(v != 0)),
        PointFamily::Double => value.as_int().map(|v| MeasuredValue::Double(v as u8)),
        PointFamily::StepPos => value.as_str().and_then(parse_step_value),
        PointFamily::MvNormalized => value.as_f64().map(|v| MeasuredValue::Normalized(v as f32)),
        PointFamily::MvScaled => value.as_int().map(|v| MeasuredValue::Scaled(v as i16)),
        PointFamily::MvShort => value.as_f64().map(|v| MeasuredValue::Short(v as f32)),
    }
}

/// Step position readings arrive as `"[<value>,<transient>]"`.
fn parse_step_value(raw: &str) -> Option<MeasuredValue> {
    let inner = raw.strip_prefix('[')?.strip_suffix(']')?;
    let (num, transient) = inner.split_once(',')?;
    Some(MeasuredValue::Step {
        position: num.trim().parse::<i32>().ok()? as i8,
        transient: transient.trim() == "true",
    })
}

fn spontaneous_asdu(
    type_id: TypeID,
    cause: Cause,
    ca: CommonAddr,
    ioa: InfoObjAddr,
    point: &MonitoredPoint,
) -> Result<Asdu, FrameError> {
    let cot = CauseOfTransmission::new(false, false, cause);
    let quality = point.quality;
    let time = point.timestamp;
    match point.value {
        MeasuredValue::Single(v) => mproc::single(
            type_id,
            cot,
            0,
            ca,
            vec![SinglePointInfo::new(ioa, v, quality, time)],
        ),
        MeasuredValue::Double(v) => mproc::double(
            type_id,
            cot,
            0,
            ca,
            vec![DoublePointInfo::new(ioa, v, quality, time)],
        ),
        MeasuredValue::Step {
            position,
            transient,
        } => mproc::step_position(
            type_id,
            cot,
            0,
            ca,
            vec![StepPositionInfo::new(ioa, position, transient, quality, time)],
        ),
        MeasuredValue::Normalized(v) => mproc::measured_normalized(
            type_id,
            cot,
            0,
            ca,
            vec![MeasuredValueNormalInfo::from_normalized(ioa, v, quality, time)],
        ),
        MeasuredValue::Scaled(v) => mproc::measured_scaled(
            type_id,
            cot,
            0,
            ca,
            vec![MeasuredValueScaledInfo::new(ioa, v, quality, time)],
        ),
        MeasuredValue::Short(v) => mproc::measured_short(
            type_id,
            cot,
            0,
            ca,
            vec![MeasuredValueFloatInfo::new(ioa, v, quality, time)],
        ),
    }
}
