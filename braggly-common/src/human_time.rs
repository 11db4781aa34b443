//! `HH:MM:SS` time strings as reported by the backend's import queue
//!
//! The backend estimates the remaining time of each running COD import and
//! reports it as `HH:MM:SS`. A value of exactly `00:00:00` means the backend
//! has no estimate yet, not that the import is about to finish.

use std::cmp::Ordering;

/// Interpretation of an ETA string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Backend reports `00:00:00`, an unparseable value, or nothing at all
    Estimating,
    /// Seconds until the import is expected to finish
    Remaining(u64),
}

impl Eta {
    /// Interpret an optional `HH:MM:SS` string
    ///
    /// # Examples
    ///
    /// ```
    /// use braggly_common::human_time::Eta;
    ///
    /// assert_eq!(Eta::from_report(Some("00:10:30")), Eta::Remaining(630));
    /// assert_eq!(Eta::from_report(Some("00:00:00")), Eta::Estimating);
    /// assert_eq!(Eta::from_report(None), Eta::Estimating);
    /// ```
    pub fn from_report(eta: Option<&str>) -> Self {
        match eta.and_then(eta_to_seconds) {
            Some(0) | None => Eta::Estimating,
            Some(seconds) => Eta::Remaining(seconds),
        }
    }

    pub fn seconds(&self) -> Option<u64> {
        match self {
            Eta::Estimating => None,
            Eta::Remaining(s) => Some(*s),
        }
    }
}

impl Ord for Eta {
    /// Known estimates sort soonest first; "still estimating" sorts last
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Eta::Remaining(a), Eta::Remaining(b)) => a.cmp(b),
            (Eta::Remaining(_), Eta::Estimating) => Ordering::Less,
            (Eta::Estimating, Eta::Remaining(_)) => Ordering::Greater,
            (Eta::Estimating, Eta::Estimating) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Eta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Convert `HH:MM:SS` to seconds
///
/// Hours may exceed 23. Minutes and seconds must be below 60.
///
/// # Examples
///
/// ```
/// use braggly_common::human_time::eta_to_seconds;
///
/// assert_eq!(eta_to_seconds("00:10:30"), Some(630));
/// assert_eq!(eta_to_seconds("26:00:01"), Some(93601));
/// assert_eq!(eta_to_seconds("10:30"), None);
/// ```
pub fn eta_to_seconds(eta: &str) -> Option<u64> {
    let mut parts = eta.trim().split(':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?.parse::<u64>().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Format seconds as `HH:MM:SS`
///
/// ```
/// use braggly_common::human_time::format_hms;
///
/// assert_eq!(format_hms(630), "00:10:30");
/// assert_eq!(format_hms(93601), "26:00:01");
/// ```
pub fn format_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_to_seconds() {
        assert_eq!(eta_to_seconds("00:10:30"), Some(630));
        assert_eq!(eta_to_seconds("01:00:00"), Some(3600));
        assert_eq!(eta_to_seconds(" 00:00:05 "), Some(5));
        assert_eq!(eta_to_seconds("00:00:00"), Some(0));
    }

    #[test]
    fn test_eta_to_seconds_rejects_malformed() {
        assert_eq!(eta_to_seconds(""), None);
        assert_eq!(eta_to_seconds("abc"), None);
        assert_eq!(eta_to_seconds("00:61:00"), None);
        assert_eq!(eta_to_seconds("00:00:60"), None);
        assert_eq!(eta_to_seconds("00:00:00:00"), None);
        assert_eq!(eta_to_seconds("-1:00:00"), None);
    }

    #[test]
    fn test_zero_eta_is_estimating() {
        assert_eq!(Eta::from_report(Some("00:00:00")), Eta::Estimating);
        assert_eq!(Eta::from_report(Some("soon")), Eta::Estimating);
        assert_eq!(Eta::from_report(Some("00:00:01")), Eta::Remaining(1));
    }

    #[test]
    fn test_estimating_sorts_after_known_eta() {
        let mut etas = vec![
            Eta::Estimating,
            Eta::Remaining(630),
            Eta::Remaining(5),
        ];
        etas.sort();
        assert_eq!(
            etas,
            vec![Eta::Remaining(5), Eta::Remaining(630), Eta::Estimating]
        );
    }

    #[test]
    fn test_format_roundtrip_sample() {
        assert_eq!(eta_to_seconds(&format_hms(4321)), Some(4321));
    }
}
