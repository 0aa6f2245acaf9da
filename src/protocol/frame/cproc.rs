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
use bytes::{BufMut, BytesMut};
use chrono::Utc;
use std::io::Cursor;

// Control-direction process information objects.

// Single command qualifier
bit_struct! {
    pub struct ObjectSCO(u8) {
        se: bool,
        qu: u5,
        res: u1,
        scs: bool,
    }
}

// Double command qualifier
bit_struct! {
    pub struct ObjectDCO(u8) {
        se: bool,
        qu: u5,
        dcs: u2,
    }
}

// Regulating step command qualifier
bit_struct! {
    pub struct ObjectRCO(u8) {
        se: bool,
        qu: u5,
        rcs: u2,
    }
}

// Set-point command qualifier
bit_struct! {
    pub struct ObjectQOS(u8) {
        se: u1,
        ql: u7,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleCommandInfo {
    pub ioa: InfoObjAddr,
    pub sco: ObjectSCO,
    pub time: Option<Cp56Time2a>,
}

impl SingleCommandInfo {
    pub fn new(ioa: InfoObjAddr, value: bool, select: bool) -> Self {
        let sco = ObjectSCO::new(select, u5!(0), u1!(0), value);
        Self {
            ioa,
            sco,
            time: None,
        }
    }

    #[inline]
    pub fn is_select(&self) -> bool {
        let mut sco = self.sco;
        sco.se().get()
    }

    #[inline]
    pub fn state(&self) -> bool {
        let mut sco = self.sco;
        sco.scs().get()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoubleCommandInfo {
    pub ioa: InfoObjAddr,
    pub dco: ObjectDCO,
    pub time: Option<Cp56Time2a>,
}

impl DoubleCommandInfo {
    pub fn new(ioa: InfoObjAddr, value: u8, select: bool) -> Self {
        let dco = ObjectDCO::new(select, u5!(0), u2::new(value % 4).unwrap());
        Self {
            ioa,
            dco,
            time: None,
        }
    }

    #[inline]
    pub fn is_select(&self) -> bool {
        let mut dco = self.dco;
        dco.se().get()
    }

    #[inline]
    pub fn state(&self) -> u8 {
        let mut dco = self.dco;
        dco.dcs().get().value()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepCommandInfo {
    pub ioa: InfoObjAddr,
    pub rco: ObjectRCO,
    pub time: Option<Cp56Time2a>,
}

impl StepCommandInfo {
    pub fn new(ioa: InfoObjAddr, value: u8, select: bool) -> Self {
        let rco = ObjectRCO::new(select, u5!(0), u2::new(value % 4).unwrap());
        Self {
            ioa,
            rco,
            time: None,
        }
    }

    #[inline]
    pub fn is_select(&self) -> bool {
        let mut rco = self.rco;
        rco.se().get()
    }

    #[inline]
    pub fn state(&self) -> u8 {
        let mut rco = self.rco;
        rco.rcs().get().value()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetPointCommandNormalInfo {
    pub ioa: InfoObjAddr,
    pub nva: i16,
    pub qos: ObjectQOS,
    pub time: Option<Cp56Time2a>,
}

impl SetPointCommandNormalInfo {
    pub fn new(ioa: InfoObjAddr, nva: i16) -> Self {
        Self {
            ioa,
            nva,
            qos: ObjectQOS::new(u1!(0), u7!(0)),
            time: None,
        }
    }

    /// Set-point in [-1.0, 1.0).
    #[inline]
    pub fn value(&self) -> f32 {
        self.nva as f32 / 32768.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetPointCommandScaledInfo {
    pub ioa: InfoObjAddr,
    pub sva: i16,
    pub qos: ObjectQOS,
    pub time: Option<Cp56Time2a>,
}

impl SetPointCommandScaledInfo {
    pub fn new(ioa: InfoObjAddr, sva: i16) -> Self {
        Self {
            ioa,
            sva,
            qos: ObjectQOS::new(u1!(0), u7!(0)),
            time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetPointCommandFloatInfo {
    pub ioa: InfoObjAddr,
    pub r: f32,
    pub qos: ObjectQOS,
    pub time: Option<Cp56Time2a>,
}

impl SetPointCommandFloatInfo {
    pub fn new(ioa: InfoObjAddr, r: f32) -> Self {
        Self {
            ioa,
            r,
            qos: ObjectQOS::new(u1!(0), u7!(0)),
            time: None,
        }
    }
}

fn command_cause_checked(cot: CauseOfTransmission) -> Result<CauseOfTransmission, Error> {
    let mut cot = cot;
    let cause = cot.cause().get();
    if !(cause == Cause::Activation
        || cause == Cause::ActivationCon
        || cause == Cause::Deactivation
        || cause == Cause::DeactivationCon
        || cause == Cause::ActivationTerm
        || cause == Cause::UnknownTypeID
        || cause == Cause::UnknownCOT
        || cause == Cause::UnknownCA
        || cause == Cause::UnknownIOA)
    {
        return Err(Error::CauseNotAllowed(cot));
    }
    Ok(cot)
}

fn command_identifier(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
) -> Identifier {
    Identifier {
        type_id,
        variable_struct: VariableStruct::new(u1!(0), u7!(1)),
        cot,
        orig_addr,
        common_addr: ca,
    }
}

#[inline]
fn put_time(buf: &mut BytesMut, time: &Option<Cp56Time2a>) {
    let tag = time.unwrap_or_else(|| Cp56Time2a::new(Utc::now()));
    buf.extend_from_slice(&tag.encode());
}

// single_cmd sends a type identification [C_SC_NA_1] or [C_SC_TA_1].
// See companion standard 101, subclass 7.3.2.1.
pub fn single_cmd(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    cmd: SingleCommandInfo,
) -> Result<Asdu, Error> {
    let cot = command_cause_checked(cot)?;

    let with_time = match type_id {
        TypeID::C_SC_NA_1 => false,
        TypeID::C_SC_TA_1 => true,
        other => return Err(Error::TypeIdMismatch(other)),
    };
    let mut buf = BytesMut::with_capacity(3 + 1 + if with_time { 7 } else { 0 });
    buf.put_uint_le(cmd.ioa as u64, 3);
    buf.put_u8(cmd.sco.raw());
    if with_time {
        put_time(&mut buf, &cmd.time);
    }

    Ok(Asdu {
        identifier: command_identifier(type_id, cot, orig_addr, ca),
        raw: buf.freeze(),
    })
}

// double_cmd sends a type identification [C_DC_NA_1] or [C_DC_TA_1].
// See companion standard 101, subclass 7.3.2.2.
pub fn double_cmd(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    cmd: DoubleCommandInfo,
) -> Result<Asdu, Error> {
    let cot = command_cause_checked(cot)?;

    let with_time = match type_id {
        TypeID::C_DC_NA_1 => false,
        TypeID::C_DC_TA_1 => true,
        other => return Err(Error::TypeIdMismatch(other)),
    };
    let mut buf = BytesMut::with_capacity(3 + 1 + if with_time { 7 } else { 0 });
    buf.put_uint_le(cmd.ioa as u64, 3);
    buf.put_u8(cmd.dco.raw());
    if with_time {
        put_time(&mut buf, &cmd.time);
    }

    Ok(Asdu {
        identifier: command_identifier(type_id, cot, orig_addr, ca),
        raw: buf.freeze(),
    })
}

// step_cmd sends a type identification [C_RC_NA_1] or [C_RC_TA_1].
// See companion standard 101, subclass 7.3.2.3.
pub fn step_cmd(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    cmd: StepCommandInfo,
) -> Result<Asdu, Error> {
    let cot = command_cause_checked(cot)?;

    let with_time = match type_id {
        TypeID::C_RC_NA_1 => false,
        TypeID::C_RC_TA_1 => true,
        other => return Err(Error::TypeIdMismatch(other)),
    };
    let mut buf = BytesMut::with_capacity(3 + 1 + if with_time { 7 } else { 0 });
    buf.put_uint_le(cmd.ioa as u64, 3);
    buf.put_u8(cmd.rco.raw());
    if with_time {
        put_time(&mut buf, &cmd.time);
    }

    Ok(Asdu {
        identifier: command_identifier(type_id, cot, orig_addr, ca),
        raw: buf.freeze(),
    })
}

// set_point_cmd_normal sends a type identification [C_SE_NA_1] or [C_SE_TA_1].
// See companion standard 101, subclass 7.3.2.4.
pub fn set_point_cmd_normal(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    cmd: SetPointCommandNormalInfo,
) -> Result<Asdu, Error> {
    let cot = command_cause_checked(cot)?;

    let with_time = match type_id {
        TypeID::C_SE_NA_1 => false,
        TypeID::C_SE_TA_1 => true,
        other => return Err(Error::TypeIdMismatch(other)),
    };
    let mut buf = BytesMut::with_capacity(3 + 2 + 1 + if with_time { 7 } else { 0 });
    buf.put_uint_le(cmd.ioa as u64, 3);
    buf.put_i16_le(cmd.nva);
    buf.put_u8(cmd.qos.raw());
    if with_time {
        put_time(&mut buf, &cmd.time);
    }

    Ok(Asdu {
        identifier: command_identifier(type_id, cot, orig_addr, ca),
        raw: buf.freeze(),
    })
}

// set_point_cmd_scaled sends a type identification [C_SE_NB_1] or [C_SE_TB_1].
// See companion standard 101, subclass 7.3.2.5.
pub fn set_point_cmd_scaled(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    cmd: SetPointCommandScaledInfo,
) -> Result<Asdu, Error> {
    let cot = command_cause_checked(cot)?;

    let with_time = match type_id {
        TypeID::C_SE_NB_1 => false,
        TypeID::C_SE_TB_1 => true,
        other => return Err(Error::TypeIdMismatch(other)),
    };
    let mut buf = BytesMut::with_capacity(3 + 2 + 1 + if with_time { 7 } else { 0 });
    buf.put_uint_le(cmd.ioa as u64, 3);
    buf.put_i16_le(cmd.sva);
    buf.put_u8(cmd.qos.raw());
    if with_time {
        put_time(&mut buf, &cmd.time);
    }

    Ok(Asdu {
        identifier: command_identifier(type_id, cot, orig_addr, ca),
        raw: buf.freeze(),
    })
}

// set_point_cmd_float sends a type identification [C_SE_NC_1] or [C_SE_TC_1].
// See companion standard 101, subclass 7.3.2.6.
pub fn set_point_cmd_float(
    type_id: TypeID,
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    cmd: SetPointCommandFloatInfo,
) -> Result<Asdu, Error> {
    let cot = command_cause_checked(cot)?;

    let with_time = match type_id {
        TypeID::C_SE_NC_1 => false,
        TypeID::C_SE_TC_1 => true,
        other => return Err(Error::TypeIdMismatch(other)),
    };
    let mut buf = BytesMut::with_capacity(3 + 4 + 1 + if with_time { 7 } else { 0 });
    buf.put_uint_le(cmd.ioa as u64, 3);
    buf.put_f32_le(cmd.r);
    buf.put_u8(cmd.qos.raw());
    if with_time {
        put_time(&mut buf, &cmd.time);
    }

    Ok(Asdu {
        identifier: command_identifier(type_id, cot, orig_addr, ca),
        raw: buf.freeze(),
    })
}

impl Asdu {
    // [C_SC_NA_1] or [C_SC_TA_1]
    pub fn get_single_cmd(&self) -> Result<SingleCommandInfo, Error> {
        let mut rdr = Cursor::new(&self.raw);
        let ioa = rdr.read_u24::<LittleEndian>()?;
        let sco = ObjectSCO::try_from(rdr.read_u8()?).unwrap();

        let time = match self.identifier.type_id {
            TypeID::C_SC_NA_1 => None,
            TypeID::C_SC_TA_1 => Some(Cp56Time2a::decode(&mut rdr)?),
            other => return Err(Error::TypeIdMismatch(other)),
        };
        Ok(SingleCommandInfo { ioa, sco, time })
    }

    // [C_DC_NA_1] or [C_DC_TA_1]
    pub fn get_double_cmd(&self) -> Result<DoubleCommandInfo, Error> {
        let mut rdr = Cursor::new(&self.raw);
        let ioa = rdr.read_u24::<LittleEndian>()?;
        let dco = ObjectDCO::try_from(rdr.read_u8()?).unwrap();

        let time = match self.identifier.type_id {
            TypeID::C_DC_NA_1 => None,
            TypeID::C_DC_TA_1 => Some(Cp56Time2a::decode(&mut rdr)?),
            other => return Err(Error::TypeIdMismatch(other)),
        };
        Ok(DoubleCommandInfo { ioa, dco, time })
    }

    // [C_RC_NA_1] or [C_RC_TA_1]
    pub fn get_step_cmd(&self) -> Result<StepCommandInfo, Error> {
        let mut rdr = Cursor::new(&self.raw);
        let ioa = rdr.read_u24::<LittleEndian>()?;
        let rco = ObjectRCO::try_from(rdr.read_u8()?).unwrap();

        let time = match self.identifier.type_id {
            TypeID::C_RC_NA_1 => None,
            TypeID::C_RC_TA_1 => Some(Cp56Time2a::decode(&mut rdr)?),
            other => return Err(Error::TypeIdMismatch(other)),
        };
        Ok(StepCommandInfo { ioa, rco, time })
    }

    // [C_SE_NA_1] or [C_SE_TA_1]
    pub fn get_set_point_normal_cmd(&self) -> Result<SetPointCommandNormalInfo, Error> {
        let mut rdr = Cursor::new(&self.raw);
        let ioa = rdr.read_u24::<LittleEndian>()?;
        let nva = rdr.read_i16::<LittleEndian>()?;
        let qos = ObjectQOS::try_from(rdr.read_u8()?).unwrap();

        let time = match self.identifier.type_id {
            TypeID::C_SE_NA_1 => None,
            TypeID::C_SE_TA_1 => Some(Cp56Time2a::decode(&mut rdr)?),
            other => return Err(Error::TypeIdMismatch(other)),
        };
        Ok(SetPointCommandNormalInfo {
            ioa,
            nva,
            qos,
            time,
        })
    }

    // [C_SE_NB_1] or [C_SE_TB_1]
    pub fn get_set_point_scaled_cmd(&self) -> Result<SetPointCommandScaledInfo, Error> {
        let mut rdr = Cursor::new(&self.raw);
        let ioa = rdr.read_u24::<LittleEndian>()?;
        let sva = rdr.read_i16::<LittleEndian>()?;
        let qos = ObjectQOS::try_from(rdr.read_u8()?).unwrap();

        let time = match self.identifier.type_id {
            TypeID::C_SE_NB_1 => None,
            TypeID::C_SE_TB_1 => Some(Cp56Time2a::decode(&mut rdr)?),
            other => return Err(Error::TypeIdMismatch(other)),
        };
        Ok(SetPointCommandScaledInfo {
            ioa,
            sva,
            qos,
            time,
        })
    }

    // [C_SE_NC_1] or [C_SE_TC_1]
    pub fn get_set_point_float_cmd(&self) -> Result<SetPointCommandFloatInfo, Error> {
        let mut rdr = Cursor::new(&self.raw);
        let ioa = rdr.read_u24::<LittleEndian>()?;
        let r = rdr.read_f32::<LittleEndian>()?;
        let qos = ObjectQOS::try_from(rdr.read_u8()?).unwrap();

        let time = match self.identifier.type_id {
            TypeID::C_SE_NC_1 => None,
            TypeID::C_SE_TC_1 => Some(Cp56Time2a::decode(&mut rdr)?),
            other => return Err(Error::TypeIdMismatch(other)),
        };
        Ok(SetPointCommandFloatInfo { ioa, r, qos, time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation() -> CauseOfTransmission {
        CauseOfTransmission::new(false, false, Cause::Activation)
    }

    #[test]
    fn single_cmd_select_round_trip() -> Result<(), Error> {
        let cmd = SingleCommandInfo::new(2001, true, true);
        let asdu = single_cmd(TypeID::C_SC_NA_1, activation(), 5, 41, cmd.clone())?;
        assert_eq!(asdu.identifier.orig_addr, 5);

        let decoded = asdu.get_single_cmd()?;
        assert_eq!(decoded, cmd);
        assert!(decoded.is_select());
        assert!(decoded.state());
        Ok(())
    }

    #[test]
    fn timed_command_keeps_timestamp() -> Result<(), Error> {
        let mut cmd = DoubleCommandInfo::new(9, 2, false);
        cmd.time = Some(Cp56Time2a::from_ms(1_700_000_100_000));
        let asdu = double_cmd(TypeID::C_DC_TA_1, activation(), 0, 7, cmd)?;

        let decoded = asdu.get_double_cmd()?;
        assert_eq!(decoded.state(), 2);
        assert_eq!(decoded.time.unwrap().to_ms(), 1_700_000_100_000);
        Ok(())
    }

    #[test]
    fn set_point_float_round_trip() -> Result<(), Error> {
        let cmd = SetPointCommandFloatInfo::new(410, 3.25);
        let asdu = set_point_cmd_float(TypeID::C_SE_NC_1, activation(), 0, 3, cmd.clone())?;
        let decoded = asdu.get_set_point_float_cmd()?;
        assert_eq!(decoded, cmd);
        Ok(())
    }

    #[test]
    fn monitor_cause_rejected_for_commands() {
        let cot = CauseOfTransmission::new(false, false, Cause::Spontaneous);
        let cmd = StepCommandInfo::new(1, 1, false);
        assert!(step_cmd(TypeID::C_RC_NA_1, cot, 0, 1, cmd).is_err());
    }
}
