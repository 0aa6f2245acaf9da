mod error;
pub mod frame;

pub use self::{
    error::Error,
    frame::{
        asdu::{
            Asdu, Cause, CauseOfTransmission, CommonAddr, InfoObjAddr, OriginAddr, TypeID,
            ASDU_SIZE_DEFAULT, IDENTIFIER_SIZE,
        },
        csys::{ObjectQOI, QOI_GROUP_MAX, QOI_STATION},
        time::Cp56Time2a,
    },
};
