//! In-memory registry of monitored and command points keyed by (CA, IOA).
//! Values are replaced as whole structs; readers take per-CA snapshots, so
//! the interrogation and spontaneous paths never observe partial updates.

use crate::{
    config::{ConfigError, ExchangeConfig},
    protocol::{
        frame::{asdu::INFO_OBJ_ADDR_MAX, mproc::QUALITY_GOOD},
        CommonAddr, Cp56Time2a, InfoObjAddr, TypeID,
    },
};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Monitored type family; immutable once a point is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFamily {
    Single,
    Double,
    StepPos,
    MvNormalized,
    MvScaled,
    MvShort,
}

impl PointFamily {
    pub fn of(type_id: TypeID) -> Option<Self> {
        Some(match type_id {
            TypeID::M_SP_NA_1 | TypeID::M_SP_TB_1 => Self::Single,
            TypeID::M_DP_NA_1 | TypeID::M_DP_TB_1 => Self::Double,
            TypeID::M_ST_NA_1 | TypeID::M_ST_TB_1 => Self::StepPos,
            TypeID::M_ME_NA_1 | TypeID::M_ME_TD_1 => Self::MvNormalized,
            TypeID::M_ME_NB_1 | TypeID::M_ME_TE_1 => Self::MvScaled,
            TypeID::M_ME_NC_1 | TypeID::M_ME_TF_1 => Self::MvShort,
            _ => return None,
        })
    }

    /// The without-timestamp type of this family, used in GI responses.
    pub fn plain_type(&self) -> TypeID {
        match self {
            Self::Single => TypeID::M_SP_NA_1,
            Self::Double => TypeID::M_DP_NA_1,
            Self::StepPos => TypeID::M_ST_NA_1,
            Self::MvNormalized => TypeID::M_ME_NA_1,
            Self::MvScaled => TypeID::M_ME_NB_1,
            Self::MvShort => TypeID::M_ME_NC_1,
        }
    }

    pub fn matches(&self, type_id: TypeID) -> bool {
        PointFamily::of(type_id) == Some(*self)
    }

    fn initial_value(&self) -> MeasuredValue {
        match self {
            Self::Single => MeasuredValue::Single(false),
            Self::Double => MeasuredValue::Double(0),
            Self::StepPos => MeasuredValue::Step {
                position: 0,
                transient: false,
            },
            Self::MvNormalized => MeasuredValue::Normalized(0.0),
            Self::MvScaled => MeasuredValue::Scaled(0),
            Self::MvShort => MeasuredValue::Short(0.0),
        }
    }
}

/// Current value of a monitored point, variant per family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasuredValue {
    Single(bool),
    Double(u8),
    Step { position: i8, transient: bool },
    Normalized(f32),
    Scaled(i16),
    Short(f32),
}

impl MeasuredValue {
    pub fn family(&self) -> PointFamily {
        match self {
            Self::Single(_) => PointFamily::Single,
            Self::Double(_) => PointFamily::Double,
            Self::Step { .. } => PointFamily::StepPos,
            Self::Normalized(_) => PointFamily::MvNormalized,
            Self::Scaled(_) => PointFamily::MvScaled,
            Self::Short(_) => PointFamily::MvShort,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitoredPoint {
    pub family: PointFamily,
    pub value: MeasuredValue,
    pub quality: u8,
    pub timestamp: Option<Cp56Time2a>,
    pub gi_groups: u32,
}

impl MonitoredPoint {
    fn new(family: PointFamily, gi_groups: u32) -> Self {
        Self {
            family,
            value: family.initial_value(),
            quality: QUALITY_GOOD,
            timestamp: None,
            gi_groups,
        }
    }

    /// Whether this point is reported for QOI, bit (QOI - 20) of the mask.
    #[inline]
    pub fn in_gi_group(&self, qoi: u8) -> bool {
        (20..=36).contains(&qoi) && (self.gi_groups >> (qoi - 20)) & 1 == 1
    }
}

#[derive(Debug, Clone, Default)]
struct CommandPoint {
    /// Allowed command families, normalized to the without-time form.
    allowed: BTreeSet<u8>,
}

#[derive(Debug, Clone, Default)]
struct PointEntry {
    monitored: Option<MonitoredPoint>,
    command: CommandPoint,
}

/// Maps a timed command type onto its plain sibling.
fn untimed_command(type_id: TypeID) -> TypeID {
    match type_id {
        TypeID::C_SC_TA_1 => TypeID::C_SC_NA_1,
        TypeID::C_DC_TA_1 => TypeID::C_DC_NA_1,
        TypeID::C_RC_TA_1 => TypeID::C_RC_NA_1,
        TypeID::C_SE_TA_1 => TypeID::C_SE_NA_1,
        TypeID::C_SE_TB_1 => TypeID::C_SE_NB_1,
        TypeID::C_SE_TC_1 => TypeID::C_SE_NC_1,
        other => other,
    }
}

#[derive(Debug, Default)]
pub struct PointTable {
    cas: DashMap<CommonAddr, BTreeMap<InfoObjAddr, PointEntry>>,
}

impl PointTable {
    pub fn from_exchange(exchange: &ExchangeConfig) -> Result<Self, ConfigError> {
        let table = Self::default();
        for dp in &exchange.datapoints {
            if dp.ioa > INFO_OBJ_ADDR_MAX {
                return Err(ConfigError::IoaOutOfRange {
                    ca: dp.ca,
                    ioa: dp.ioa,
                });
            }
            let type_id = TypeID::from_type_name(&dp.type_name)
                .ok_or_else(|| ConfigError::UnknownTypeName(dp.type_name.clone()))?;

            let mut ca_map = table.cas.entry(dp.ca).or_default();
            let entry = ca_map.entry(dp.ioa).or_default();

            if let Some(family) = PointFamily::of(type_id) {
                if entry.monitored.is_some() {
                    return Err(ConfigError::DuplicatePoint {
                        ca: dp.ca,
                        ioa: dp.ioa,
                    });
                }
                entry.monitored = Some(MonitoredPoint::new(family, dp.gi_groups));
            } else if type_id.is_command() {
                entry.command.allowed.insert(untimed_command(type_id) as u8);
            } else {
                return Err(ConfigError::TypeKindMismatch {
                    type_name: dp.type_name.clone(),
                    kind: "monitored or command",
                    ca: dp.ca,
                    ioa: dp.ioa,
                });
            }
        }
        Ok(table)
    }

    #[inline]
    pub fn has_ca(&self, ca: CommonAddr) -> bool {
        self.cas.contains_key(&ca)
    }

    /// Known CAs in ascending order, for broadcast interrogation sweeps.
    pub fn ca_list(&self) -> Vec<CommonAddr> {
        let mut cas: Vec<CommonAddr> = self.cas.iter().map(|kv| *kv.key()).collect();
        cas.sort_unstable();
        cas
    }

    #[inline]
    pub fn entry_exists(&self, ca: CommonAddr, ioa: InfoObjAddr) -> bool {
        self.cas
            .get(&ca)
            .map(|m| m.contains_key(&ioa))
            .unwrap_or(false)
    }

    /// Monitored point lookup with type-family check.
    pub fn monitored(
        &self,
        ca: CommonAddr,
        ioa: InfoObjAddr,
        type_id: TypeID,
    ) -> Option<MonitoredPoint> {
        let ca_map = self.cas.get(&ca)?;
        let point = ca_map.get(&ioa)?.monitored?;
        point.family.matches(type_id).then_some(point)
    }

    pub fn command_allows(&self, ca: CommonAddr, ioa: InfoObjAddr, type_id: TypeID) -> bool {
        self.cas
            .get(&ca)
            .and_then(|m| {
                m.get(&ioa)
                    .map(|e| e.command.allowed.contains(&(untimed_command(type_id) as u8)))
            })
            .unwrap_or(false)
    }

    /// Replace the stored state of a monitored point. The previous value is
    /// kept when the reading carries none (or a mismatching variant), the way
    /// quality-only refreshes work.
    pub fn update(
        &self,
        ca: CommonAddr,
        ioa: InfoObjAddr,
        type_id: TypeID,
        value: Option<MeasuredValue>,
        quality: u8,
        timestamp: Option<Cp56Time2a>,
    ) -> Option<MonitoredPoint> {
        let mut ca_map = self.cas.get_mut(&ca)?;
        let entry = ca_map.get_mut(&ioa)?;
        let current = entry.monitored?;
        if !current.family.matches(type_id) {
            return None;
        }

        let mut next = current;
        match value {
            Some(v) if v.family() == current.family => next.value = v,
            Some(v) => {
                warn!(ca, ioa, ?v, "reading value variant does not match point family, kept previous value");
            }
            None => {}
        }
        next.quality = quality;
        if type_id.carries_time() {
            next.timestamp = timestamp;
        }
        entry.monitored = Some(next);
        Some(next)
    }

    /// Snapshot of a CA's monitored points in IOA order.
    pub fn snapshot_ca(&self, ca: CommonAddr) -> Vec<(InfoObjAddr, MonitoredPoint)> {
        self.cas
            .get(&ca)
            .map(|m| {
                m.iter()
                    .filter_map(|(ioa, e)| e.monitored.map(|p| (*ioa, p)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointConfig;

    fn exchange(points: Vec<PointConfig>) -> ExchangeConfig {
        ExchangeConfig { datapoints: points }
    }

    fn point(ca: CommonAddr, ioa: u32, type_name: &str, gi_groups: u32) -> PointConfig {
        PointConfig {
            ca,
            ioa,
            type_name: type_name.to_string(),
            gi_groups,
        }
    }

    #[test]
    fn registers_monitored_and_command_on_shared_ioa() {
        let table = PointTable::from_exchange(&exchange(vec![
            point(41, 2001, "M_SP_NA_1", 1),
            point(41, 2001, "C_SC_NA_1", 0),
        ]))
        .unwrap();

        assert!(table.monitored(41, 2001, TypeID::M_SP_NA_1).is_some());
        assert!(table.monitored(41, 2001, TypeID::M_SP_TB_1).is_some());
        assert!(table.monitored(41, 2001, TypeID::M_DP_NA_1).is_none());
        assert!(table.command_allows(41, 2001, TypeID::C_SC_NA_1));
        // timed form of the same family is accepted as well
        assert!(table.command_allows(41, 2001, TypeID::C_SC_TA_1));
        assert!(!table.command_allows(41, 2001, TypeID::C_DC_NA_1));
    }

    #[test]
    fn duplicate_monitored_point_is_rejected() {
        let err = PointTable::from_exchange(&exchange(vec![
            point(1, 7, "M_ME_NC_1", 1),
            point(1, 7, "M_ME_NA_1", 1),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePoint { ca: 1, ioa: 7 }));
    }

    #[test]
    fn update_replaces_whole_state() {
        let table =
            PointTable::from_exchange(&exchange(vec![point(3, 100, "M_ME_NB_1", 1)])).unwrap();

        let updated = table
            .update(
                3,
                100,
                TypeID::M_ME_TE_1,
                Some(MeasuredValue::Scaled(-42)),
                QUALITY_GOOD,
                Some(Cp56Time2a::from_ms(1_700_000_000_000)),
            )
            .unwrap();
        assert_eq!(updated.value, MeasuredValue::Scaled(-42));
        assert_eq!(updated.timestamp.unwrap().to_ms(), 1_700_000_000_000);

        // quality-only refresh keeps the value, the plain type keeps the old tag
        let refreshed = table
            .update(3, 100, TypeID::M_ME_NB_1, None, 0x80, None)
            .unwrap();
        assert_eq!(refreshed.value, MeasuredValue::Scaled(-42));
        assert_eq!(refreshed.quality, 0x80);
        assert_eq!(refreshed.timestamp.unwrap().to_ms(), 1_700_000_000_000);
    }

    #[test]
    fn mismatching_variant_keeps_previous_value() {
        let table =
            PointTable::from_exchange(&exchange(vec![point(3, 100, "M_SP_NA_1", 1)])).unwrap();
        let updated = table
            .update(
                3,
                100,
                TypeID::M_SP_NA_1,
                Some(MeasuredValue::Scaled(5)),
                QUALITY_GOOD,
                None,
            )
            .unwrap();
        assert_eq!(updated.value, MeasuredValue::Single(false));
    }

    #[test]
    fn gi_group_mask_selects_points() {
        let p = MonitoredPoint::new(PointFamily::Single, 0b101);
        assert!(p.in_gi_group(20));
        assert!(!p.in_gi_group(21));
        assert!(p.in_gi_group(22));
        assert!(!p.in_gi_group(37));
    }

    #[test]
    fn ca_list_sorted_for_broadcast() {
        let table = PointTable::from_exchange(&exchange(vec![
            point(170, 1, "M_SP_NA_1", 1),
            point(41, 1, "M_SP_NA_1", 1),
            point(99, 1, "M_SP_NA_1", 1),
        ]))
        .unwrap();
        assert_eq!(table.ca_list(), vec![41, 99, 170]);
    }
}
