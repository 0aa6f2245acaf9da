use super::{
    super::error::Error,
    asdu::{
        Asdu, Cause, CauseOfTransmission, CommonAddr, Identifier, InfoObjAddr, TypeID,
        VariableStruct,
    },
    time::Cp56Time2a,
};
use bit_struct::*;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use std::io::Cursor;

// Monitor-direction process information objects.

pub const QUALITY_GOOD: u8 = 0x00;
pub const QUALITY_OVERFLOW: u8 = 0x01;
pub const QUALITY_BLOCKED: u8 = 0x10;
pub const QUALITY_SUBSTITUTED: u8 = 0x20;
pub const QUALITY_NON_TOPICAL: u8 = 0x40;
pub const QUALITY_INVALID: u8 = 0x80;

// Single-point indication with quality descriptor
bit_struct! {
    pub struct ObjectSIQ(u8) {
        invalid: bool,
        nt: bool,
        sb: bool,
        bl: bool,
        res: u3,
        spi: bool,
    }
}

// Double-point indication with quality descriptor
bit_struct! {
    pub struct ObjectDIQ(u8) {
        invalid: bool,
        nt: bool,
        sb: bool,
        bl: bool,
        res: u2,
        dpi: u2,
    }
}

// Quality descriptor octet
bit_struct! {
    pub struct ObjectQDS(u8) {
        invalid: bool,
        nt: bool,
        sb: bool,
        bl: bool,
        res: u3,
        ov: bool,
    }
}

// Value with transient state indication, 7-bit two's complement
bit_struct! {
    pub struct ObjectVTI(u8) {
        transient: bool,
        value: u7,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinglePointInfo {
    pub ioa: InfoObjAddr,
    pub siq: ObjectSIQ,
    pub time: Option<Cp56Time2a>,
}

impl SinglePointInfo {
    pub fn new(ioa: InfoObjAddr, value: bool, quality: u8, time: Option<Cp56Time2a>) -> Self {
        let siq = ObjectSIQ::try_from((quality & 0xf0) | value as u8).unwrap();
        Self { ioa, siq, time }
    }

    #[inline]
    pub fn value(&self) -> bool {
        let mut siq = self.siq;
        siq.spi().get()
    }

    #[inline]
    pub fn quality(&self) -> u8 {
        self.siq.raw() & 0xf0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoublePointInfo {
    pub ioa: InfoObjAddr,
    pub diq: ObjectDIQ,
    pub time: Option<Cp56Time2a>,
}

impl DoublePointInfo {
    pub fn new(ioa: InfoObjAddr, value: u8, quality: u8, time: Option<Cp56Time2a>) -> Self {
        let diq = ObjectDIQ::try_from((quality & 0xf0) | (value & 0x03)).unwrap();
        Self { ioa, diq, time }
    }

    #[inline]
    pub fn value(&self) -> u8 {
        let mut diq = self.diq;
        diq.dpi().get().value()
    }

    #[inline]
    pub fn quality(&self) -> u8 {
        self.diq.raw() & 0xf0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepPositionInfo {
    pub ioa: InfoObjAddr,
    pub vti: ObjectVTI,
    pub qds: ObjectQDS,
    pub time: Option<Cp56Time2a>,
}

impl StepPositionInfo {
    pub fn new(
        ioa: InfoObjAddr,
        position: i8,
        transient: bool,
        quality: u8,
        time: Option<Cp56Time2a>,
    ) -> Self {
        let vti =
            ObjectVTI::try_from(((transient as u8) << 7) | (position as u8 & 0x7f)).unwrap();
        let qds = ObjectQDS::try_from(quality & 0xf1).unwrap();
        Self {
            ioa,
            vti,
            qds,
            time,
        }
    }

    /// Step position in [-64, 63], sign-extended from the 7-bit field.
    #[inline]
    pub fn position(&self) -> i8 {
        let mut vti = self.vti;
        let v = vti.value().get().value();
        if v & 0x40 != 0 {
            (v | 0x80) as i8
        } else {
            v as i8
        }
    }

    #[inline]
    pub fn transient(&self) -> bool {
        let mut vti = self.vti;
        vti.transient().get()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredValueNormalInfo {
    pub ioa: InfoObjAddr,
    pub nva: i16,
    pub qds: ObjectQDS,
    pub time: Option<Cp56Time2a>,
}

impl MeasuredValueNormalInfo {
    pub fn new(ioa: InfoObjAddr, nva: i16, quality: u8, time: Option<Cp56Time2a>) -> Self {
        let qds = ObjectQDS::try_from(quality & 0xf1).unwrap();
        Self {
            ioa,
            nva,
            qds,
            time,
        }
    }

    /// Build from a normalized value in [-1.0, 1.0).
    pub fn from_normalized(
        ioa: InfoObjAddr,
        value: f32,
        quality: u8,
        time: Option<Cp56Time2a>,
    ) -> Self {
        Self::new(ioa, normalized_to_nva(value), quality, time)
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.nva as f32 / 32768.0
    }
}

/// Clamp a normalized value into the 16-bit fixed-point wire form.
#[inline]
pub fn normalized_to_nva(value: f32) -> i16 {
    (value * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredValueScaledInfo {
    pub ioa: InfoObjAddr,
    pub sva: i16,
    pub qds: ObjectQDS,
    pub time: Option<Cp56Time2a>,
}

impl MeasuredValueScaledInfo {
    pub fn new(ioa: InfoObjAddr, sva: i16, quality: u8, time: Option<Cp56Time2a>) -> Self {
        let qds = ObjectQDS::try_from(quality & 0xf1).unwrap();
        Self {
            ioa,
            sva,
            qds,
            time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredValueFloatInfo {
    pub ioa: InfoObjAddr,
    pub r: f32,
    pub qds: ObjectQDS,
    pub time: Option<Cp56Time2a>,
}

impl MeasuredValueFloatInfo {
    pub fn new(ioa: InfoObjAddr, r: f32, quality: u8, time: Option<Cp56Time2a>) -> Self {
        let qds = ObjectQDS::try_from(quality & 0xf1).unwrap();
        Self { ioa, r, qds, time }
    }
}

/// Encoded size of one information object of `type_id`, 3-byte IOA included.
pub fn element_size(type_id: TypeID) -> Option<usize> {
    let base = match type_id {
        TypeID::M_SP_NA_1 | TypeID::M_SP_TB_1 => 4,
        TypeID::M_DP_NA_1 | TypeID::M_DP_TB_1 => 4,
        TypeID::M_ST_NA_1 | TypeID::M_ST_TB_1 => 5,
        TypeID::M_ME_NA_1 | TypeID::M_ME_TD_1 => 6,
        TypeID::M_ME_NB_1 | TypeID::M_ME_TE_1 => 6,
        TypeID::M_ME_NC_1 | TypeID::M_ME_TF_1 => 8,
        _ => return None,
    };
    Some(base + if type_id.carries_time() { 7 } else { 0 })
}

fn monitor_cause_checked(cot: CauseOfTransmission) -> Result<CauseOfTransmission, Error> {
    let mut cot = cot;
    let cause = cot.cause().get();
    if !(cause == Cause::Periodic
        || cause == Cause::Background
        || cause == Cause::Spontaneous
        || cause == Cause::Request
        || cause == Cause::ReturnInfoRemote
        || cause == Cause::ReturnInfoLocal
        || (cause >= Cause::InterrogatedByStation && cause <= Cause::InterrogatedByGroup16))
    {
        return Err(Error::CauseNotAllowed(cot));
    }
    Ok(cot)
}

fn identifier_for(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    count: usize,
) -> Result<Identifier, Error> {
    if count == 0 || count > 127 {
        return Err(Error::InvalidObjectCount(count));
    }
    Ok(Identifier {
        type_id,
        variable_struct: VariableStruct::new(u1!(0), u7::new(count as u8).unwrap()),
        cot,
        orig_addr,
        common_addr: ca,
    })
}

#[inline]
fn put_time(buf: &mut BytesMut, time: &Option<Cp56Time2a>) {
    let tag = time.unwrap_or_else(|| Cp56Time2a::new(Utc::now()));
    buf.extend_from_slice(&tag.encode());
}

// single sends a type identification [M_SP_NA_1] or [M_SP_TB_1].
// See companion standard 101, subclass 7.3.1.1 and 7.3.1.22.
pub fn single(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    infos: Vec<SinglePointInfo>,
) -> Result<Asdu, Error> {
    let cot = monitor_cause_checked(cot)?;
    let identifier = identifier_for(type_id, cot, orig_addr, ca, infos.len())?;

    let mut buf = BytesMut::new();
    for info in infos {
        buf.put_uint_le(info.ioa as u64, 3);
        buf.put_u8(info.siq.raw());
        match type_id {
            TypeID::M_SP_NA_1 => (),
            TypeID::M_SP_TB_1 => put_time(&mut buf, &info.time),
            _ => return Err(Error::TypeIdMismatch(type_id)),
        }
    }

    Ok(Asdu {
        identifier,
        raw: buf.freeze(),
    })
}

// double sends a type identification [M_DP_NA_1] or [M_DP_TB_1].
// See companion standard 101, subclass 7.3.1.3 and 7.3.1.23.
pub fn double(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    infos: Vec<DoublePointInfo>,
) -> Result<Asdu, Error> {
    let cot = monitor_cause_checked(cot)?;
    let identifier = identifier_for(type_id, cot, orig_addr, ca, infos.len())?;

    let mut buf = BytesMut::new();
    for info in infos {
        buf.put_uint_le(info.ioa as u64, 3);
        buf.put_u8(info.diq.raw());
        match type_id {
            TypeID::M_DP_NA_1 => (),
            TypeID::M_DP_TB_1 => put_time(&mut buf, &info.time),
            _ => return Err(Error::TypeIdMismatch(type_id)),
        }
    }

    Ok(Asdu {
        identifier,
        raw: buf.freeze(),
    })
}

// step_position sends a type identification [M_ST_NA_1] or [M_ST_TB_1].
// See companion standard 101, subclass 7.3.1.5 and 7.3.1.24.
pub fn step_position(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    infos: Vec<StepPositionInfo>,
) -> Result<Asdu, Error> {
    let cot = monitor_cause_checked(cot)?;
    let identifier = identifier_for(type_id, cot, orig_addr, ca, infos.len())?;

    let mut buf = BytesMut::new();
    for info in infos {
        buf.put_uint_le(info.ioa as u64, 3);
        buf.put_u8(info.vti.raw());
        buf.put_u8(info.qds.raw());
        match type_id {
            TypeID::M_ST_NA_1 => (),
            TypeID::M_ST_TB_1 => put_time(&mut buf, &info.time),
            _ => return Err(Error::TypeIdMismatch(type_id)),
        }
    }

    Ok(Asdu {
        identifier,
        raw: buf.freeze(),
    })
}

// measured_normalized sends a type identification [M_ME_NA_1] or [M_ME_TD_1].
// See companion standard 101, subclass 7.3.1.9 and 7.3.1.26.
pub fn measured_normalized(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    infos: Vec<MeasuredValueNormalInfo>,
) -> Result<Asdu, Error> {
    let cot = monitor_cause_checked(cot)?;
    let identifier = identifier_for(type_id, cot, orig_addr, ca, infos.len())?;

    let mut buf = BytesMut::new();
    for info in infos {
        buf.put_uint_le(info.ioa as u64, 3);
        buf.put_i16_le(info.nva);
        buf.put_u8(info.qds.raw());
        match type_id {
            TypeID::M_ME_NA_1 => (),
            TypeID::M_ME_TD_1 => put_time(&mut buf, &info.time),
            _ => return Err(Error::TypeIdMismatch(type_id)),
        }
    }

    Ok(Asdu {
        identifier,
        raw: buf.freeze(),
    })
}

// measured_scaled sends a type identification [M_ME_NB_1] or [M_ME_TE_1].
// See companion standard 101, subclass 7.3.1.11 and 7.3.1.27.
pub fn measured_scaled(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    infos: Vec<MeasuredValueScaledInfo>,
) -> Result<Asdu, Error> {
    let cot = monitor_cause_checked(cot)?;
    let identifier = identifier_for(type_id, cot, orig_addr, ca, infos.len())?;

    let mut buf = BytesMut::new();
    for info in infos {
        buf.put_uint_le(info.ioa as u64, 3);
        buf.put_i16_le(info.sva);
        buf.put_u8(info.qds.raw());
        match type_id {
            TypeID::M_ME_NB_1 => (),
            TypeID::M_ME_TE_1 => put_time(&mut buf, &info.time),
            _ => return Err(Error::TypeIdMismatch(type_id)),
        }
    }

    Ok(Asdu {
        identifier,
        raw: buf.freeze(),
    })
}

// measured_short sends a type identification [M_ME_NC_1] or [M_ME_TF_1].
// See companion standard 101, subclass 7.3.1.13 and 7.3.1.28.
pub fn measured_short(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    infos: Vec<MeasuredValueFloatInfo>,
) -> Result<Asdu, Error> {
    let cot = monitor_cause_checked(cot)?;
    let identifier = identifier_for(type_id, cot, orig_addr, ca, infos.len())?;

    let mut buf = BytesMut::new();
    for info in infos {
        buf.put_uint_le(info.ioa as u64, 3);
        buf.put_f32_le(info.r);
        buf.put_u8(info.qds.raw());
        match type_id {
            TypeID::M_ME_NC_1 => (),
            TypeID::M_ME_TF_1 => put_time(&mut buf, &info.time),
            _ => return Err(Error::TypeIdMismatch(type_id)),
        }
    }

    Ok(Asdu {
        identifier,
        raw: buf.freeze(),
    })
}

struct ObjectReader<'a> {
    rdr: Cursor<&'a Bytes>,
    is_sequence: bool,
    number: usize,
    next_ioa: InfoObjAddr,
    index: usize,
}

impl<'a> ObjectReader<'a> {
    fn new(asdu: &'a Asdu) -> Self {
        let mut vs = asdu.identifier.variable_struct;
        Self {
            rdr: Cursor::new(&asdu.raw),
            is_sequence: vs.is_sequence().get().value() == 1,
            number: vs.number().get().value() as usize,
            next_ioa: 0,
            index: 0,
        }
    }

    fn next_addr(&mut self) -> Result<InfoObjAddr, Error> {
        let ioa = if !self.is_sequence || self.index == 0 {
            self.rdr.read_u24::<LittleEndian>()?
        } else {
            self.next_ioa
        };
        self.index += 1;
        self.next_ioa = ioa + 1;
        Ok(ioa)
    }

    fn time(&mut self, with_time: bool) -> Result<Option<Cp56Time2a>, Error> {
        if with_time {
            Ok(Some(Cp56Time2a::decode(&mut self.rdr)?))
        } else {
            Ok(None)
        }
    }
}

impl Asdu {
    // [M_SP_NA_1] or [M_SP_TB_1]
    pub fn get_single_point(&self) -> Result<Vec<SinglePointInfo>, Error> {
        let with_time = match self.identifier.type_id {
            TypeID::M_SP_NA_1 => false,
            TypeID::M_SP_TB_1 => true,
            other => return Err(Error::TypeIdMismatch(other)),
        };
        let mut reader = ObjectReader::new(self);
        let mut infos = Vec::with_capacity(reader.number);
        for _ in 0..reader.number {
            let ioa = reader.next_addr()?;
            let siq = ObjectSIQ::try_from(reader.rdr.read_u8()?).unwrap();
            let time = reader.time(with_time)?;
            infos.push(SinglePointInfo { ioa, siq, time });
        }
        Ok(infos)
    }

    // [M_DP_NA_1] or [M_DP_TB_1]
    pub fn get_double_point(&self) -> Result<Vec<DoublePointInfo>, Error> {
        let with_time = match self.identifier.type_id {
            TypeID::M_DP_NA_1 => false,
            TypeID::M_DP_TB_1 => true,
            other => return Err(Error::TypeIdMismatch(other)),
        };
        let mut reader = ObjectReader::new(self);
        let mut infos = Vec::with_capacity(reader.number);
        for _ in 0..reader.number {
            let ioa = reader.next_addr()?;
            let diq = ObjectDIQ::try_from(reader.rdr.read_u8()?).unwrap();
            let time = reader.time(with_time)?;
            infos.push(DoublePointInfo { ioa, diq, time });
        }
        Ok(infos)
    }

    // [M_ST_NA_1] or [M_ST_TB_1]
    pub fn get_step_position(&self) -> Result<Vec<StepPositionInfo>, Error> {
        let with_time = match self.identifier.type_id {
            TypeID::M_ST_NA_1 => false,
            TypeID::M_ST_TB_1 => true,
            other => return Err(Error::TypeIdMismatch(other)),
        };
        let mut reader = ObjectReader::new(self);
        let mut infos = Vec::with_capacity(reader.number);
        for _ in 0..reader.number {
            let ioa = reader.next_addr()?;
            let vti = ObjectVTI::try_from(reader.rdr.read_u8()?).unwrap();
            let qds = ObjectQDS::try_from(reader.rdr.read_u8()?).unwrap();
            let time = reader.time(with_time)?;
            infos.push(StepPositionInfo {
                ioa,
                vti,
                qds,
                time,
            });
        }
        Ok(infos)
    }

    // [M_ME_NA_1] or [M_ME_TD_1]
    pub fn get_measured_value_normal(&self) -> Result<Vec<MeasuredValueNormalInfo>, Error> {
        let with_time = match self.identifier.type_id {
            TypeID::M_ME_NA_1 => false,
            TypeID::M_ME_TD_1 => true,
            other => return Err(Error::TypeIdMismatch(other)),
        };
        let mut reader = ObjectReader::new(self);
        let mut infos = Vec::with_capacity(reader.number);
        for _ in 0..reader.number {
            let ioa = reader.next_addr()?;
            let nva = reader.rdr.read_i16::<LittleEndian>()?;
            let qds = ObjectQDS::try_from(reader.rdr.read_u8()?).unwrap();
            let time = reader.time(with_time)?;
            infos.push(MeasuredValueNormalInfo {
                ioa,
                nva,
                qds,
                time,
            });
        }
        Ok(infos)
    }

    // [M_ME_NB_1] or [M_ME_TE_1]
    pub fn get_measured_value_scaled(&self) -> Result<Vec<MeasuredValueScaledInfo>, Error> {
        let with_time = match self.identifier.type_id {
            TypeID::M_ME_NB_1 => false,
            TypeID::M_ME_TE_1 => true,
            other => return Err(Error::TypeIdMismatch(other)),
        };
        let mut reader = ObjectReader::new(self);
        let mut infos = Vec::with_capacity(reader.number);
        for _ in 0..reader.number {
            let ioa = reader.next_addr()?;
            let sva = reader.rdr.read_i16::<LittleEndian>()?;
            let qds = ObjectQDS::try_from(reader.rdr.read_u8()?).unwrap();
            let time = reader.time(with_time)?;
            infos.push(MeasuredValueScaledInfo {
                ioa,
                sva,
                qds,
                time,
            });
        }
        Ok(infos)
    }

    // [M_ME_NC_1] or [M_ME_TF_1]
    pub fn get_measured_value_float(&self) -> Result<Vec<MeasuredValueFloatInfo>, Error> {
        let with_time = match self.identifier.type_id {
            TypeID::M_ME_NC_1 => false,
            TypeID::M_ME_TF_1 => true,
            other => return Err(Error::TypeIdMismatch(other)),
        };
        let mut reader = ObjectReader::new(self);
        let mut infos = Vec::with_capacity(reader.number);
        for _ in 0..reader.number {
            let ioa = reader.next_addr()?;
            let r = reader.rdr.read_f32::<LittleEndian>()?;
            let qds = ObjectQDS::try_from(reader.rdr.read_u8()?).unwrap();
            let time = reader.time(with_time)?;
            infos.push(MeasuredValueFloatInfo { ioa, r, qds, time });
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spontaneous() -> CauseOfTransmission {
        CauseOfTransmission::new(false, false, Cause::Spontaneous)
    }

    #[test]
    fn single_point_with_time_round_trip() -> Result<(), Error> {
        let tag = Cp56Time2a::from_ms(1_700_000_000_123);
        let info = SinglePointInfo::new(2001, true, QUALITY_BLOCKED, Some(tag));
        let asdu = single(
            TypeID::M_SP_TB_1,
            spontaneous(),
            0,
            41,
            vec![info.clone()],
        )?;

        let decoded = asdu.get_single_point()?;
        assert_eq!(decoded, vec![info]);
        assert!(decoded[0].value());
        assert_eq!(decoded[0].quality(), QUALITY_BLOCKED);
        Ok(())
    }

    #[test]
    fn step_position_sign_extension() -> Result<(), Error> {
        let info = StepPositionInfo::new(300, -5, true, QUALITY_GOOD, None);
        let asdu = step_position(TypeID::M_ST_NA_1, spontaneous(), 0, 1, vec![info])?;

        let decoded = asdu.get_step_position()?;
        assert_eq!(decoded[0].position(), -5);
        assert!(decoded[0].transient());
        Ok(())
    }

    #[test]
    fn measured_short_round_trip() -> Result<(), Error> {
        let info = MeasuredValueFloatInfo::new(7001, -12.5, QUALITY_OVERFLOW, None);
        let asdu = measured_short(TypeID::M_ME_NC_1, spontaneous(), 0, 12, vec![info.clone()])?;

        let decoded = asdu.get_measured_value_float()?;
        assert_eq!(decoded, vec![info]);
        Ok(())
    }

    #[test]
    fn sequence_addresses_increment() -> Result<(), Error> {
        // SQ=1: one shared IOA then contiguous addresses
        let mut asdu = single(
            TypeID::M_SP_NA_1,
            spontaneous(),
            0,
            1,
            vec![
                SinglePointInfo::new(100, true, QUALITY_GOOD, None),
                SinglePointInfo::new(101, false, QUALITY_GOOD, None),
            ],
        )?;
        // rewrite as a sequence frame: single IOA followed by two elements
        asdu.identifier.variable_struct = VariableStruct::new(u1!(1), u7!(2));
        let mut buf = BytesMut::new();
        buf.put_uint_le(100, 3);
        buf.put_u8(0x01);
        buf.put_u8(0x00);
        asdu.raw = buf.freeze();

        let decoded = asdu.get_single_point()?;
        assert_eq!(decoded[0].ioa, 100);
        assert_eq!(decoded[1].ioa, 101);
        assert!(decoded[0].value());
        assert!(!decoded[1].value());
        Ok(())
    }

    #[test]
    fn normalized_conversion_clamps() {
        assert_eq!(normalized_to_nva(1.5), i16::MAX);
        assert_eq!(normalized_to_nva(-1.0), i16::MIN);
        let info = MeasuredValueNormalInfo::from_normalized(1, 0.5, QUALITY_GOOD, None);
        assert!((info.value() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn element_sizes_match_wire_layout() -> Result<(), Error> {
        let asdu = double(
            TypeID::M_DP_TB_1,
            spontaneous(),
            0,
            3,
            vec![DoublePointInfo::new(5, 2, QUALITY_GOOD, None)],
        )?;
        assert_eq!(asdu.raw.len(), element_size(TypeID::M_DP_TB_1).unwrap());

        let asdu = measured_scaled(
            TypeID::M_ME_NB_1,
            spontaneous(),
            0,
            3,
            vec![MeasuredValueScaledInfo::new(5, -42, QUALITY_GOOD, None)],
        )?;
        assert_eq!(asdu.raw.len(), element_size(TypeID::M_ME_NB_1).unwrap());
        Ok(())
    }
}
