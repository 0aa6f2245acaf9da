use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::io::Cursor;

// CP56Time2a
// |         Milliseconds(D7--D0)        | Milliseconds = 0-59999
// |         Milliseconds(D15--D8)       |
// | IV(D7)   SUB(D6)   Minutes(D5--D0)  | Minutes = 0-59, IV: 0 = valid, 1 = invalid
// | SU(D7)   RES(D6-D5)  Hours(D4--D0)  | Hours = 0-23, SU: 0 = standard time, 1 = summer time
// | DayOfWeek(D7--D5) DayOfMonth(D4--D0)| DayOfMonth = 1-31  DayOfWeek = 1-7
// | RES(D7--D4)         Months(D3--D0)  | Months = 1-12
// | RES(D7)             Year(D6--D0)    | Year = 0-99 (offset from 2000)

pub const CP56TIME2A_SIZE: usize = 7;

/// Seven-byte binary time tag with its IV/SU/SUB flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp56Time2a {
    pub timestamp: DateTime<Utc>,
    pub invalid: bool,
    pub summer_time: bool,
    pub substituted: bool,
}

impl Cp56Time2a {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            invalid: false,
            summer_time: false,
            substituted: false,
        }
    }

    /// Build from milliseconds since the Unix epoch, flags cleared.
    pub fn from_ms(epoch_ms: u64) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(epoch_ms as i64)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self::new(timestamp)
    }

    /// Milliseconds since the Unix epoch.
    pub fn to_ms(&self) -> u64 {
        self.timestamp.timestamp_millis().max(0) as u64
    }

    pub fn encode(&self) -> Bytes {
        let t = self.timestamp;
        let mut buf = BytesMut::with_capacity(CP56TIME2A_SIZE);

        let msec = t.timestamp_subsec_millis() as u16 + t.second() as u16 * 1000;
        let minute =
            t.minute() as u8 | ((self.invalid as u8) << 7) | ((self.substituted as u8) << 6);
        let hour = t.hour() as u8 | ((self.summer_time as u8) << 7);
        let weekday = t.weekday().number_from_monday() as u8;
        let day = t.day() as u8;
        let month = t.month() as u8;
        let year = (t.year() - 2000).rem_euclid(100) as u8;

        buf.put_u16_le(msec);
        buf.put_u8(minute);
        buf.put_u8(hour);
        buf.put_u8(weekday << 5 | day);
        buf.put_u8(month);
        buf.put_u8(year);

        buf.freeze()
    }

    pub fn decode(rdr: &mut Cursor<&Bytes>) -> Result<Self> {
        if rdr.remaining() < CP56TIME2A_SIZE {
            return Err(anyhow!("short CP56Time2a tag"));
        }
        let millisecond = rdr.read_u16::<LittleEndian>()?;
        let msec = millisecond % 1000;
        let sec = (millisecond / 1000) as u32;
        let min_raw = rdr.read_u8()?;
        let invalid = min_raw & 0x80 != 0;
        let substituted = min_raw & 0x40 != 0;
        let min = (min_raw & 0x3f) as u32;
        let hour_raw = rdr.read_u8()?;
        let summer_time = hour_raw & 0x80 != 0;
        let hour = (hour_raw & 0x1f) as u32;
        let day = (rdr.read_u8()? & 0x1f) as u32;
        let month = (rdr.read_u8()? & 0x0f) as u32;
        let year = 2000 + (rdr.read_u8()? & 0x7f) as i32;

        let timestamp = Utc
            .with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .ok_or_else(|| anyhow!("invalid calendar fields in CP56Time2a"))?
            + Duration::milliseconds(msec as i64);

        Ok(Self {
            timestamp,
            invalid,
            summer_time,
            substituted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_round_trip() {
        let ms = 1_714_381_375_431u64;
        let tag = Cp56Time2a::from_ms(ms);
        assert_eq!(tag.to_ms(), ms);

        let raw = Bytes::from(tag.encode());
        let mut rdr = Cursor::new(&raw);
        let decoded = Cp56Time2a::decode(&mut rdr).unwrap();
        assert_eq!(decoded.to_ms(), ms);
        assert!(!decoded.invalid);
    }

    #[test]
    fn flags_survive_encode_decode() {
        let mut tag = Cp56Time2a::from_ms(86_400_000);
        tag.invalid = true;
        tag.summer_time = true;
        tag.substituted = true;

        let raw = Bytes::from(tag.encode());
        let mut rdr = Cursor::new(&raw);
        let decoded = Cp56Time2a::decode(&mut rdr).unwrap();
        assert!(decoded.invalid);
        assert!(decoded.summer_time);
        assert!(decoded.substituted);
        assert_eq!(decoded.timestamp, tag.timestamp);
    }
}
