use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Returns `candidate` unless it is earlier than `floor`, in which case `floor`.
///
/// Keeps appended timestamps non-decreasing when the wall clock steps back.
pub(crate) fn not_before(candidate: OffsetDateTime, floor: Option<OffsetDateTime>) -> OffsetDateTime {
    match floor {
        Some(floor) if floor > candidate => floor,
        _ => candidate,
    }
}

pub(crate) fn rfc3339(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HoursMinutesSeconds {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl From<Duration> for HoursMinutesSeconds {
    fn from(value: Duration) -> Self {
        let total = value.as_secs();
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn not_before_clamps_to_floor() {
        let earlier = datetime!(2025-01-01 00:00 UTC);
        let later = datetime!(2025-01-02 00:00 UTC);
        assert_eq!(not_before(earlier, Some(later)), later);
        assert_eq!(not_before(later, Some(earlier)), later);
        assert_eq!(not_before(earlier, None), earlier);
    }

    #[test]
    fn rfc3339_formats_utc() {
        assert_eq!(
            rfc3339(datetime!(2025-03-04 05:06:07 UTC)),
            "2025-03-04T05:06:07Z"
        );
    }

    #[test]
    fn splits_duration_into_hms() {
        let hms = HoursMinutesSeconds::from(Duration::from_secs(3 * 3600 + 25 * 60 + 9));
        assert_eq!(
            hms,
            HoursMinutesSeconds {
                hours: 3,
                minutes: 25,
                seconds: 9
            }
        );
    }
}
