use super::{
    super::error::Error,
    asdu::{
        Asdu, Cause, CauseOfTransmission, CommonAddr, Identifier, TypeID, VariableStruct,
        INFO_OBJ_ADDR_IRRELEVANT,
    },
    time::Cp56Time2a,
};
use bit_struct::*;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::Cursor;

// System information objects in control direction.

pub const QOI_STATION: u8 = 20;
pub const QOI_GROUP_MAX: u8 = 36;

// Qualifier of interrogation: 20 = station, 21..36 = group 1..16
bit_struct! {
    pub struct ObjectQOI(u8) {
        range: u8,
    }
}

// interrogation_cmd sends a type identification [C_IC_NA_1].
// See companion standard 101, subclass 7.3.4.1.
pub fn interrogation_cmd(
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    qoi: ObjectQOI,
) -> Result<Asdu, Error> {
    let mut cot = cot;
    let cause = cot.cause().get();

    if !(cause == Cause::Activation || cause == Cause::Deactivation) {
        return Err(Error::CauseNotAllowed(cot));
    }

    let mut buf = BytesMut::with_capacity(3 + 1);
    buf.put_uint_le(INFO_OBJ_ADDR_IRRELEVANT as u64, 3);
    buf.put_u8(qoi.raw());

    Ok(Asdu {
        identifier: Identifier {
            type_id: TypeID::C_IC_NA_1,
            variable_struct: VariableStruct::new(u1!(0), u7!(1)),
            cot,
            orig_addr,
            common_addr: ca,
        },
        raw: buf.freeze(),
    })
}

// clock_synchronization_cmd sends a type identification [C_CS_NA_1].
// See companion standard 101, subclass 7.3.4.4.
pub fn clock_synchronization_cmd(
    cot: CauseOfTransmission,
    orig_addr: u8,
    ca: CommonAddr,
    time: Cp56Time2a,
) -> Result<Asdu, Error> {
    let mut cot = cot;
    let cause = cot.cause().get();
    if !(cause == Cause::Activation || cause == Cause::ActivationCon) {
        return Err(Error::CauseNotAllowed(cot));
    }

    let mut buf = BytesMut::with_capacity(3 + 7);
    buf.put_uint_le(INFO_OBJ_ADDR_IRRELEVANT as u64, 3);
    buf.extend_from_slice(&time.encode());

    Ok(Asdu {
        identifier: Identifier {
            type_id: TypeID::C_CS_NA_1,
            variable_struct: VariableStruct::new(u1!(0), u7!(1)),
            cot,
            orig_addr,
            common_addr: ca,
        },
        raw: buf.freeze(),
    })
}

impl Asdu {
    // [C_IC_NA_1] qualifier of interrogation
    pub fn get_interrogation_cmd(&self) -> Result<ObjectQOI, Error> {
        if self.identifier.type_id != TypeID::C_IC_NA_1 {
            return Err(Error::TypeIdMismatch(self.identifier.type_id));
        }
        let mut rdr = Cursor::new(&self.raw);
        let _ioa = rdr.read_u24::<LittleEndian>()?;
        let qoi = ObjectQOI::try_from(rdr.read_u8()?).unwrap();
        Ok(qoi)
    }

    // [C_CS_NA_1] clock synchronization time tag
    pub fn get_clock_sync_cmd(&self) -> Result<Cp56Time2a, Error> {
        if self.identifier.type_id != TypeID::C_CS_NA_1 {
            return Err(Error::TypeIdMismatch(self.identifier.type_id));
        }
        let mut rdr = Cursor::new(&self.raw);
        let _ioa = rdr.read_u24::<LittleEndian>()?;
        Ok(Cp56Time2a::decode(&mut rdr)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrogation_round_trip() -> Result<(), Error> {
        let cot = CauseOfTransmission::new(false, false, Cause::Activation);
        let asdu = interrogation_cmd(cot, 3, 41, ObjectQOI::new(QOI_STATION))?;
        assert_eq!(asdu.identifier.orig_addr, 3);

        let qoi = asdu.get_interrogation_cmd()?;
        assert_eq!(qoi.raw(), QOI_STATION);
        Ok(())
    }

    #[test]
    fn clock_sync_round_trip() -> Result<(), Error> {
        let cot = CauseOfTransmission::new(false, false, Cause::Activation);
        let tag = Cp56Time2a::from_ms(1_700_001_234_567);
        let asdu = clock_synchronization_cmd(cot, 0, 1, tag)?;
        assert_eq!(asdu.get_clock_sync_cmd()?.to_ms(), 1_700_001_234_567);
        Ok(())
    }
}
