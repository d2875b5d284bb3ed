//! Calibration payloads and elapsed-time classification.
//!
//! The calibration service exposes the time of the last calibration as a
//! 32-bit Unix timestamp and the sensor offset as a fixed-point word. The
//! controller turns the timestamp into a phrase such as `"2 days ago"`.

use chrono::{DateTime, Months, TimeZone, Utc};

use crate::protocol::codec::{encode_le, read_prefixed_u32, FieldWidth, FIXED_POINT_SCALE};
use crate::utils::unix_timestamp;

/// Calendar unit used when describing elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElapsedUnit {
    /// Seconds.
    Second,
    /// Minutes.
    Minute,
    /// Hours.
    Hour,
    /// Days.
    Day,
    /// Weeks.
    Week,
    /// Calendar months.
    Month,
    /// Calendar years.
    Year,
}

impl ElapsedUnit {
    /// English name of the unit, pluralised for any count other than one.
    pub fn name(&self, count: i64) -> &'static str {
        let plural = count != 1;
        match (self, plural) {
            (Self::Second, false) => "second",
            (Self::Second, true) => "seconds",
            (Self::Minute, false) => "minute",
            (Self::Minute, true) => "minutes",
            (Self::Hour, false) => "hour",
            (Self::Hour, true) => "hours",
            (Self::Day, false) => "day",
            (Self::Day, true) => "days",
            (Self::Week, false) => "week",
            (Self::Week, true) => "weeks",
            (Self::Month, false) => "month",
            (Self::Month, true) => "months",
            (Self::Year, false) => "year",
            (Self::Year, true) => "years",
        }
    }
}

/// Elapsed time reduced to its largest non-zero calendar unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Elapsed {
    /// The unit that won.
    pub unit: ElapsedUnit,
    /// Whole units elapsed.
    pub value: i64,
}

impl Elapsed {
    /// Classify the time between `from` and `to`.
    ///
    /// Years and months are counted on the calendar; the remainder is split
    /// into weeks, days, hours, minutes and seconds. A `to` earlier than
    /// `from` counts as zero seconds.
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        if to <= from {
            return Self {
                unit: ElapsedUnit::Second,
                value: 0,
            };
        }

        let anchor_months = whole_months_between(from, to);
        let anchor = from
            .checked_add_months(Months::new(anchor_months))
            .unwrap_or(from);
        let rest = to - anchor;

        let years = i64::from(anchor_months / 12);
        let months = i64::from(anchor_months % 12);
        let buckets = [
            (ElapsedUnit::Year, years),
            (ElapsedUnit::Month, months),
            (ElapsedUnit::Week, rest.num_weeks()),
            (ElapsedUnit::Day, rest.num_days() % 7),
            (ElapsedUnit::Hour, rest.num_hours() % 24),
            (ElapsedUnit::Minute, rest.num_minutes() % 60),
            (ElapsedUnit::Second, rest.num_seconds() % 60),
        ];

        buckets
            .into_iter()
            .find(|(_, value)| *value > 0)
            .map(|(unit, value)| Self { unit, value })
            .unwrap_or(Self {
                unit: ElapsedUnit::Second,
                value: 0,
            })
    }

    /// Human phrase such as `"1 hour ago"`.
    pub fn phrase(&self) -> String {
        format!("{} {} ago", self.value, self.unit.name(self.value))
    }
}

impl std::fmt::Display for Elapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.phrase())
    }
}

fn whole_months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    use chrono::Datelike;

    let estimate = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    let mut months = estimate.max(0) as u32;
    while months > 0 {
        match from.checked_add_months(Months::new(months)) {
            Some(candidate) if candidate <= to => break,
            _ => months -= 1,
        }
    }
    months
}

/// Decode the last-calibration timestamp.
///
/// An empty payload or a zero timestamp means the sensor was never calibrated.
pub fn parse_last_calibrated(data: &[u8]) -> Option<DateTime<Utc>> {
    let seconds = read_prefixed_u32(data)?;
    if seconds == 0 {
        return None;
    }
    Utc.timestamp_opt(i64::from(seconds), 0).single()
}

/// Decode the calibration offset.
pub fn parse_offset(data: &[u8]) -> Option<f64> {
    read_prefixed_u32(data).map(|raw| f64::from(raw) / FIXED_POINT_SCALE)
}

/// Payload written to the calibration request characteristic.
pub fn request_payload(now: DateTime<Utc>) -> Vec<u8> {
    encode_le(unix_timestamp(now), FieldWidth::U32)
}

/// Phrase describing when the sensor was last calibrated, if ever.
pub fn last_calibrated_phrase(data: &[u8], now: DateTime<Utc>) -> Option<String> {
    parse_last_calibrated(data).map(|at| Elapsed::between(at, now).phrase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_exactly_two_days() {
        let elapsed = Elapsed::between(base(), base() + Duration::days(2));
        assert_eq!(
            elapsed,
            Elapsed {
                unit: ElapsedUnit::Day,
                value: 2
            }
        );
        assert_eq!(elapsed.phrase(), "2 days ago");
    }

    #[test]
    fn test_exactly_one_hour() {
        let elapsed = Elapsed::between(base(), base() + Duration::hours(1));
        assert_eq!(elapsed.unit, ElapsedUnit::Hour);
        assert_eq!(elapsed.value, 1);
        assert_eq!(elapsed.phrase(), "1 hour ago");
    }

    #[test]
    fn test_largest_unit_wins() {
        let to = base() + Duration::days(9) + Duration::hours(5);
        let elapsed = Elapsed::between(base(), to);
        assert_eq!(elapsed.unit, ElapsedUnit::Week);
        assert_eq!(elapsed.value, 1);

        let to = Utc.with_ymd_and_hms(2024, 3, 12, 8, 0, 0).unwrap();
        assert_eq!(Elapsed::between(base(), to).phrase(), "2 months ago");

        let to = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(Elapsed::between(base(), to).phrase(), "2 years ago");

        let to = base() + Duration::seconds(42);
        assert_eq!(Elapsed::between(base(), to).phrase(), "42 seconds ago");
    }

    #[test]
    fn test_month_end_clamping() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap();
        let elapsed = Elapsed::between(from, to);
        assert_eq!(elapsed.unit, ElapsedUnit::Month);
        assert_eq!(elapsed.value, 1);

        let to = Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap();
        assert_eq!(Elapsed::between(from, to).unit, ElapsedUnit::Week);
    }

    #[test]
    fn test_future_timestamp_is_zero() {
        let elapsed = Elapsed::between(base() + Duration::minutes(5), base());
        assert_eq!(elapsed.value, 0);
        assert_eq!(elapsed.phrase(), "0 seconds ago");
    }

    #[test]
    fn test_parse_last_calibrated() {
        let at = base();
        let bytes = (at.timestamp() as u32).to_le_bytes();
        assert_eq!(parse_last_calibrated(&bytes), Some(at));

        let mut prefixed = vec![0x01, 0x02];
        prefixed.extend_from_slice(&bytes);
        assert_eq!(parse_last_calibrated(&prefixed), Some(at));

        assert_eq!(parse_last_calibrated(&[]), None);
        assert_eq!(parse_last_calibrated(&[0, 0, 0, 0]), None);
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset(&[0x80, 0x01, 0x00, 0x00]), Some(3.0));
        assert_eq!(parse_offset(&[]), None);
    }

    #[test]
    fn test_request_payload() {
        let payload = request_payload(base());
        assert_eq!(payload.len(), 4);
        assert_eq!(
            u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            base().timestamp() as u32
        );
    }

    #[test]
    fn test_last_calibrated_phrase() {
        let bytes = (base().timestamp() as u32).to_le_bytes();
        let now = base() + Duration::days(3);
        assert_eq!(
            last_calibrated_phrase(&bytes, now).as_deref(),
            Some("3 days ago")
        );
        assert_eq!(last_calibrated_phrase(&[0, 0, 0, 0], now), None);
    }
}
