use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::{
    convert::{TryFrom, TryInto},
    fmt::{self, Display, Formatter},
    ops::{Add, Sub},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Milliseconds since the UNIX epoch, without leap seconds and in UTC
///
/// Events arrive with string-formatted ISO-8601 timestamps on the wire and are
/// parsed into this representation once, at the adapter boundary. All window
/// arithmetic is saturating, so subtracting a tolerance from a timestamp near
/// the epoch cannot wrap.
///
/// ```
/// use weft_types::Timestamp;
///
/// let ts: Timestamp = "2025-01-01T00:00:00Z".parse().unwrap();
/// assert_eq!(ts, Timestamp::new(1735689600000));
/// assert_eq!(ts.to_string(), "2025-01-01T00:00:00Z");
/// ```
#[derive(
    Copy, Clone, Debug, Default, From, Into, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Timestamp {
        let now = SystemTime::now();
        now.try_into().expect("Time went waaaay backwards")
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn millis(self) -> u64 {
        self.0
    }

    /// Milliseconds between `self` and an earlier timestamp, zero if `earlier` is not earlier.
    pub fn elapsed_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl TryFrom<SystemTime> for Timestamp {
    type Error = anyhow::Error;
    fn try_from(st: SystemTime) -> Result<Self, Self::Error> {
        let duration = st.duration_since(UNIX_EPOCH)?;
        Ok(Self::new(duration.as_millis() as u64))
    }
}

impl TryFrom<Timestamp> for DateTime<Utc> {
    type Error = anyhow::Error;

    fn try_from(ts: Timestamp) -> Result<Self, Self::Error> {
        Utc.timestamp_millis_opt(ts.0 as i64)
            .single()
            .ok_or_else(|| anyhow::anyhow!("supplied timestamp {} is out of range for DateTime<Utc>", ts.0))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        let seconds = dt.timestamp() as u64;
        Self(seconds * 1_000 + dt.timestamp_subsec_millis() as u64)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.0 as i64).single() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = DateTime::parse_from_rfc3339(s).map_err(|e| anyhow::anyhow!("failed to parse timestamp `{}`: {}", s, e))?;
        Ok(dt.with_timezone(&Utc).into())
    }
}

impl Sub<u64> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_sub(rhs))
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = i64;
    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.0.saturating_sub(rhs.0) as i64
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;
    fn sub(self, duration: Duration) -> Self::Output {
        Self(self.0.saturating_sub(duration.as_millis() as u64))
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;
    fn add(self, duration: Duration) -> Self::Output {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }
}

#[cfg(any(test, feature = "arb"))]
impl quickcheck::Arbitrary for Timestamp {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Timestamp::new(u64::arbitrary(g) & ((2 << 47) - 1))
    }
}
