//! Shared value types: timestamps and actors

use chrono::{DateTime, Duration, Months, TimeZone, Utc};

/// UTC instant, CBOR-encoded as nanoseconds since the epoch so hashes are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_years(&self, years: u32) -> Option<Self> {
        self.0.checked_add_months(Months::new(years * 12)).map(Self)
    }
    pub fn plus(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add_signed(duration).map(Self)
    }
    pub fn minus(&self, duration: Duration) -> Option<Self> {
        self.0.checked_sub_signed(duration).map(Self)
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl std::fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Who performed an action, and in which capacity.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Actor {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub role: String,
    #[n(2)]
    pub ip: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            ip: None,
        }
    }
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::now();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn plus_years_lands_on_same_calendar_day() {
        let created = TimeStamp::new_with(2025, 1, 1, 0, 0, 0).unwrap();
        let expected = TimeStamp::new_with(2033, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(created.plus_years(8), Some(expected));
    }

    #[test]
    fn leap_day_clamps_to_end_of_february() {
        let created = TimeStamp::new_with(2024, 2, 29, 12, 0, 0).unwrap();
        let expected = TimeStamp::new_with(2025, 2, 28, 12, 0, 0).unwrap();

        assert_eq!(created.plus_years(1), Some(expected));
    }
}
