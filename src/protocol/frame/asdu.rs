use anyhow::{anyhow, Result};
use bit_struct::*;
use byteorder::ReadBytesExt;
use bytes::{BufMut, Bytes, BytesMut};
use std::{
    fmt::{Debug, Display},
    io::Cursor,
};

// ASDU format
//       | data unit identification | information object <1..n> |
//
//       | <------------  data unit identification ------------>|
//       | typeID | variable struct | cause  |  common address  |
// bytes |    1   |      1          | [1,2]  |      [1,2]       |
//       | <------------  information object ------------------>|
//       | object address | element set  |  object time scale   |
// bytes |     [1,2,3]    |              |                      |

// Default upper bound for one encoded ASDU (identifier + objects) when the
// configuration leaves the size at 0.
pub const ASDU_SIZE_DEFAULT: usize = 249;

pub const IDENTIFIER_SIZE: usize = 6;

pub type OriginAddr = u8;
pub type CommonAddr = u16;

// Information object address, full 3-byte range.
pub type InfoObjAddr = u32;

pub const INFO_OBJ_ADDR_MAX: InfoObjAddr = 0xFF_FFFF;

// Zero means the information object address is irrelevant (system commands).
pub const INFO_OBJ_ADDR_IRRELEVANT: InfoObjAddr = 0;

#[derive(Debug, Clone)]
pub struct Asdu {
    pub identifier: Identifier,
    pub raw: Bytes,
}

impl Display for Asdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier.to_string().as_str())?;
        let mut s = String::with_capacity(self.raw.len() * 6);
        for b in self.raw.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "[{:#04X}]", b);
        }
        f.write_str(&s)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Identifier {
    pub type_id: TypeID,
    pub variable_struct: VariableStruct,
    pub cot: CauseOfTransmission,
    pub orig_addr: OriginAddr,
    pub common_addr: CommonAddr,
}

impl Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("[{:02X}]", self.type_id as u8))?;
        f.write_fmt(format_args!("[{:02X}]", self.variable_struct.raw()))?;
        f.write_fmt(format_args!("[{:02X}]", self.cot.raw()))?;
        f.write_fmt(format_args!("[{:02X}]", self.orig_addr))?;
        let common_addr = self.common_addr.to_le_bytes();
        f.write_fmt(format_args!("[{:02X}]", common_addr[0]))?;
        f.write_fmt(format_args!("[{:02X}]", common_addr[1]))?;
        Ok(())
    }
}

bit_struct! {
    pub struct VariableStruct(u8) {
        is_sequence: u1,
        number: u7,
    }
}

enums! {
    pub Cause {
        Unused,
        Periodic,
        Background,
        Spontaneous,
        Initialized,
        Request,
        Activation,
        ActivationCon,
        Deactivation,
        DeactivationCon,
        ActivationTerm,
        ReturnInfoRemote,
        ReturnInfoLocal,
        FileTransfer,
        Authentication,
        SessionKey,
        UserRoleAndUpdateKey,
        Reserved1,
        Reserved2,
        Reserved3,
        InterrogatedByStation,
        InterrogatedByGroup1,
        InterrogatedByGroup2,
        InterrogatedByGroup3,
        InterrogatedByGroup4,
        InterrogatedByGroup5,
        InterrogatedByGroup6,
        InterrogatedByGroup7,
        InterrogatedByGroup8,
        InterrogatedByGroup9,
        InterrogatedByGroup10,
        InterrogatedByGroup11,
        InterrogatedByGroup12,
        InterrogatedByGroup13,
        InterrogatedByGroup14,
        InterrogatedByGroup15,
        InterrogatedByGroup16,
        RequestByGeneralCounter,
        RequestByGroup1Counter,
        RequestByGroup2Counter,
        RequestByGroup3Counter,
        RequestByGroup4Counter,
        Reserved4,
        Reserved5,
        UnknownTypeID,
        UnknownCOT,
        UnknownCA,
        UnknownIOA,
    }
}

bit_struct! {
    pub struct CauseOfTransmission(u8) {
        test: bool,
        negative: bool,
        cause: Cause,
    }
}

/// Numeric cause to enum, the test/negative bits masked off.
pub fn cause_from_u8(value: u8) -> Option<Cause> {
    CauseOfTransmission::try_from(value & 0x3f)
        .ok()
        .map(|mut cot| cot.cause().get())
}

#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TypeID {
    M_SP_NA_1 = 1,
    M_DP_NA_1 = 3,
    M_ST_NA_1 = 5,
    M_ME_NA_1 = 9,
    M_ME_NB_1 = 11,
    M_ME_NC_1 = 13,
    M_SP_TB_1 = 30,
    M_DP_TB_1 = 31,
    M_ST_TB_1 = 32,
    M_ME_TD_1 = 34,
    M_ME_TE_1 = 35,
    M_ME_TF_1 = 36,
    C_SC_NA_1 = 45,
    C_DC_NA_1 = 46,
    C_RC_NA_1 = 47,
    C_SE_NA_1 = 48,
    C_SE_NB_1 = 49,
    C_SE_NC_1 = 50,
    C_SC_TA_1 = 58,
    C_DC_TA_1 = 59,
    C_RC_TA_1 = 60,
    C_SE_TA_1 = 61,
    C_SE_TB_1 = 62,
    C_SE_TC_1 = 63,
    C_IC_NA_1 = 100,
    C_CS_NA_1 = 103,
}

impl TypeID {
    /// Control-direction process command types handled by the slave.
    #[inline]
    pub fn is_command(&self) -> bool {
        matches!(
            *self,
            Self::C_SC_NA_1
                | Self::C_SC_TA_1
                | Self::C_DC_NA_1
                | Self::C_DC_TA_1
                | Self::C_RC_NA_1
                | Self::C_RC_TA_1
                | Self::C_SE_NA_1
                | Self::C_SE_TA_1
                | Self::C_SE_NB_1
                | Self::C_SE_TB_1
                | Self::C_SE_NC_1
                | Self::C_SE_TC_1
        )
    }

    /// Whether the information object ends with a CP56Time2a tag.
    #[inline]
    pub fn carries_time(&self) -> bool {
        matches!(
            *self,
            Self::M_SP_TB_1
                | Self::M_DP_TB_1
                | Self::M_ST_TB_1
                | Self::M_ME_TD_1
                | Self::M_ME_TE_1
                | Self::M_ME_TF_1
                | Self::C_SC_TA_1
                | Self::C_DC_TA_1
                | Self::C_RC_TA_1
                | Self::C_SE_TA_1
                | Self::C_SE_TB_1
                | Self::C_SE_TC_1
        )
    }

    pub fn type_name(&self) -> &'static str {
        match *self {
            Self::M_SP_NA_1 => "M_SP_NA_1",
            Self::M_DP_NA_1 => "M_DP_NA_1",
            Self::M_ST_NA_1 => "M_ST_NA_1",
            Self::M_ME_NA_1 => "M_ME_NA_1",
            Self::M_ME_NB_1 => "M_ME_NB_1",
            Self::M_ME_NC_1 => "M_ME_NC_1",
            Self::M_SP_TB_1 => "M_SP_TB_1",
            Self::M_DP_TB_1 => "M_DP_TB_1",
            Self::M_ST_TB_1 => "M_ST_TB_1",
            Self::M_ME_TD_1 => "M_ME_TD_1",
            Self::M_ME_TE_1 => "M_ME_TE_1",
            Self::M_ME_TF_1 => "M_ME_TF_1",
            Self::C_SC_NA_1 => "C_SC_NA_1",
            Self::C_DC_NA_1 => "C_DC_NA_1",
            Self::C_RC_NA_1 => "C_RC_NA_1",
            Self::C_SE_NA_1 => "C_SE_NA_1",
            Self::C_SE_NB_1 => "C_SE_NB_1",
            Self::C_SE_NC_1 => "C_SE_NC_1",
            Self::C_SC_TA_1 => "C_SC_TA_1",
            Self::C_DC_TA_1 => "C_DC_TA_1",
            Self::C_RC_TA_1 => "C_RC_TA_1",
            Self::C_SE_TA_1 => "C_SE_TA_1",
            Self::C_SE_TB_1 => "C_SE_TB_1",
            Self::C_SE_TC_1 => "C_SE_TC_1",
            Self::C_IC_NA_1 => "C_IC_NA_1",
            Self::C_CS_NA_1 => "C_CS_NA_1",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "M_SP_NA_1" => Self::M_SP_NA_1,
            "M_DP_NA_1" => Self::M_DP_NA_1,
            "M_ST_NA_1" => Self::M_ST_NA_1,
            "M_ME_NA_1" => Self::M_ME_NA_1,
            "M_ME_NB_1" => Self::M_ME_NB_1,
            "M_ME_NC_1" => Self::M_ME_NC_1,
            "M_SP_TB_1" => Self::M_SP_TB_1,
            "M_DP_TB_1" => Self::M_DP_TB_1,
            "M_ST_TB_1" => Self::M_ST_TB_1,
            "M_ME_TD_1" => Self::M_ME_TD_1,
            "M_ME_TE_1" => Self::M_ME_TE_1,
            "M_ME_TF_1" => Self::M_ME_TF_1,
            "C_SC_NA_1" => Self::C_SC_NA_1,
            "C_DC_NA_1" => Self::C_DC_NA_1,
            "C_RC_NA_1" => Self::C_RC_NA_1,
            "C_SE_NA_1" => Self::C_SE_NA_1,
            "C_SE_NB_1" => Self::C_SE_NB_1,
            "C_SE_NC_1" => Self::C_SE_NC_1,
            "C_SC_TA_1" => Self::C_SC_TA_1,
            "C_DC_TA_1" => Self::C_DC_TA_1,
            "C_RC_TA_1" => Self::C_RC_TA_1,
            "C_SE_TA_1" => Self::C_SE_TA_1,
            "C_SE_TB_1" => Self::C_SE_TB_1,
            "C_SE_TC_1" => Self::C_SE_TC_1,
            "C_IC_NA_1" => Self::C_IC_NA_1,
            "C_CS_NA_1" => Self::C_CS_NA_1,
            _ => return None,
        })
    }
}

impl TryFrom<u8> for TypeID {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::M_SP_NA_1),
            3 => Ok(Self::M_DP_NA_1),
            5 => Ok(Self::M_ST_NA_1),
            9 => Ok(Self::M_ME_NA_1),
            11 => Ok(Self::M_ME_NB_1),
            13 => Ok(Self::M_ME_NC_1),
            30 => Ok(Self::M_SP_TB_1),
            31 => Ok(Self::M_DP_TB_1),
            32 => Ok(Self::M_ST_TB_1),
            34 => Ok(Self::M_ME_TD_1),
            35 => Ok(Self::M_ME_TE_1),
            36 => Ok(Self::M_ME_TF_1),
            45 => Ok(Self::C_SC_NA_1),
            46 => Ok(Self::C_DC_NA_1),
            47 => Ok(Self::C_RC_NA_1),
            48 => Ok(Self::C_SE_NA_1),
            49 => Ok(Self::C_SE_NB_1),
            50 => Ok(Self::C_SE_NC_1),
            58 => Ok(Self::C_SC_TA_1),
            59 => Ok(Self::C_DC_TA_1),
            60 => Ok(Self::C_RC_TA_1),
            61 => Ok(Self::C_SE_TA_1),
            62 => Ok(Self::C_SE_TB_1),
            63 => Ok(Self::C_SE_TC_1),
            100 => Ok(Self::C_IC_NA_1),
            103 => Ok(Self::C_CS_NA_1),
            _ => Err(anyhow!("unsupported TypeId: {}", value)),
        }
    }
}

impl Asdu {
    /// Build a response from this ASDU with a new cause and negative flag,
    /// keeping the type, addresses and information objects.
    pub fn mirror(&self, cause: Cause, negative: bool) -> Self {
        let mut asdu = self.clone();
        asdu.identifier.cot.cause().set(cause);
        asdu.identifier.cot.negative().set(negative);
        asdu
    }

    #[inline]
    pub fn cause(&self) -> Cause {
        let mut cot = self.identifier.cot;
        cot.cause().get()
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        let mut cot = self.identifier.cot;
        cot.negative().get()
    }

    #[inline]
    pub fn is_test(&self) -> bool {
        let mut cot = self.identifier.cot;
        cot.test().get()
    }
}

impl TryFrom<Bytes> for Asdu {
    type Error = anyhow::Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        let mut rdr = Cursor::new(&bytes);
        let type_id = TypeID::try_from(rdr.read_u8()?)?;
        let variable_struct = VariableStruct::try_from(rdr.read_u8()?)
            .map_err(|_| anyhow!("invalid variable struct"))?;
        let cot = CauseOfTransmission::try_from(rdr.read_u8()?)
            .map_err(|_| anyhow!("invalid cause of transmission"))?;
        let orig_addr = rdr.read_u8()?;
        let common_addr = rdr.read_u16::<byteorder::LittleEndian>()?;
        let mut bytes = bytes;
        Ok(Asdu {
            identifier: Identifier {
                type_id,
                variable_struct,
                cot,
                orig_addr,
                common_addr,
            },
            raw: bytes.split_off(IDENTIFIER_SIZE),
        })
    }
}

impl TryInto<Bytes> for Asdu {
    type Error = anyhow::Error;

    fn try_into(self) -> Result<Bytes, Self::Error> {
        let cap = IDENTIFIER_SIZE + self.raw.len();
        let mut buf = BytesMut::with_capacity(cap);
        buf.put_u8(self.identifier.type_id as u8);
        buf.put_u8(self.identifier.variable_struct.raw());
        buf.put_u8(self.identifier.cot.raw());
        buf.put_u8(self.identifier.orig_addr);
        buf.put_u16_le(self.identifier.common_addr);
        buf.extend(self.raw);

        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_and_encode_asdu() -> Result<()> {
        let bytes =
            Bytes::from_static(&[0x01, 0x01, 0x06, 0x00, 0x80, 0x00, 0x00, 0x01, 0x02, 0x03]);
        let mut asdu: Asdu = bytes.clone().try_into()?;
        assert!(asdu.identifier.type_id == TypeID::M_SP_NA_1);
        assert_eq!(asdu.identifier.variable_struct.number().get().value(), 0x01);
        assert_eq!(asdu.cause(), Cause::Activation);
        assert_eq!(asdu.identifier.orig_addr, 0x00);
        assert_eq!(asdu.identifier.common_addr, 0x80);
        assert_eq!(asdu.raw, Bytes::from_static(&[0x00, 0x01, 0x02, 0x03]));

        let raw: Bytes = asdu.try_into().unwrap();
        assert_eq!(bytes, raw);
        Ok(())
    }

    #[test]
    fn mirror_sets_cause_and_negative() -> Result<()> {
        let bytes =
            Bytes::from_static(&[0x2D, 0x01, 0x06, 0x05, 0x29, 0x00, 0xD1, 0x07, 0x00, 0x01]);
        let asdu: Asdu = bytes.try_into()?;
        let con = asdu.mirror(Cause::ActivationCon, true);
        assert_eq!(con.cause(), Cause::ActivationCon);
        assert!(con.is_negative());
        assert_eq!(con.identifier.orig_addr, 0x05);
        assert_eq!(con.raw, asdu.raw);
        Ok(())
    }

    #[test]
    fn type_name_round_trip() {
        for t in [
            TypeID::M_SP_NA_1,
            TypeID::M_ME_TF_1,
            TypeID::C_SC_TA_1,
            TypeID::C_SE_NC_1,
        ] {
            assert_eq!(TypeID::from_type_name(t.type_name()), Some(t));
        }
        assert_eq!(TypeID::from_type_name("M_BO_NA_1"), None);
    }
}
