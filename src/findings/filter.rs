//! Finding list filters.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::detect::{FindingKind, Severity};
use crate::error::{EngineError, EngineResult};
use crate::findings::FindingStatus;

/// Result cap for a user's own list.
pub const USER_LIST_LIMIT: usize = 100;
/// Default and maximum result counts for the fleet-wide list.
pub const FLEET_LIST_DEFAULT: usize = 100;
pub const FLEET_LIST_MAX: usize = 1000;

/// Raw, unvalidated filter as it arrives in a query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingQuery {
    #[serde(alias = "type")]
    pub kind: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    /// Detected on or after; RFC 3339 or `YYYY-MM-DD`.
    #[serde(alias = "startDate")]
    pub from: Option<String>,
    /// Detected on or before; RFC 3339 or `YYYY-MM-DD` (whole day).
    #[serde(alias = "endDate")]
    pub to: Option<String>,
    pub limit: Option<usize>,
}

/// A validated filter, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingFilter {
    pub kind: Option<FindingKind>,
    pub severity: Option<Severity>,
    pub status: Option<FindingStatus>,
    pub detected_from: Option<DateTime<Utc>>,
    pub detected_to: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for FindingFilter {
    fn default() -> Self {
        Self {
            kind: None,
            severity: None,
            status: None,
            detected_from: None,
            detected_to: None,
            limit: USER_LIST_LIMIT,
        }
    }
}

impl FindingQuery {
    /// Validate for a user's own list; the limit is capped at 100.
    pub fn for_user(&self) -> EngineResult<FindingFilter> {
        self.validate(USER_LIST_LIMIT, USER_LIST_LIMIT)
    }

    /// Validate for the fleet-wide admin list.
    pub fn for_fleet(&self) -> EngineResult<FindingFilter> {
        self.validate(FLEET_LIST_DEFAULT, FLEET_LIST_MAX)
    }

    fn validate(&self, default_limit: usize, max_limit: usize) -> EngineResult<FindingFilter> {
        let kind: Option<FindingKind> = non_empty(&self.kind).map(str::parse).transpose()?;
        let severity: Option<Severity> = non_empty(&self.severity).map(str::parse).transpose()?;
        let status: Option<FindingStatus> = non_empty(&self.status).map(str::parse).transpose()?;
        let detected_from = non_empty(&self.from)
            .map(|s| parse_bound(s, false))
            .transpose()?;
        let detected_to = non_empty(&self.to)
            .map(|s| parse_bound(s, true))
            .transpose()?;

        if let (Some(from), Some(to)) = (detected_from, detected_to) {
            if from > to {
                return Err(EngineError::Validation(
                    "'from' must not be after 'to'".into(),
                ));
            }
        }

        let limit = match self.limit {
            Some(0) => {
                return Err(EngineError::Validation("limit must be positive".into()));
            }
            Some(n) => n.min(max_limit),
            None => default_limit,
        };

        Ok(FindingFilter {
            kind,
            severity,
            status,
            detected_from,
            detected_to,
            limit,
        })
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse an RFC 3339 instant or a bare date. A bare date used as an upper
/// bound covers the whole day.
fn parse_bound(s: &str, end_of_day: bool) -> EngineResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| EngineError::Validation(format!("invalid date '{s}'")))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| EngineError::Validation(format!("invalid date '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> FindingQuery {
        let s = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        serde_json::from_value(serde_json::Value::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    let value = if *k == "limit" {
                        serde_json::json!(v.parse::<usize>().unwrap())
                    } else {
                        serde_json::json!(v)
                    };
                    (k.to_string(), value)
                })
                .collect(),
        ))
        .unwrap_or_else(|e| panic!("bad query {s}: {e}"))
    }

    #[test]
    fn test_empty_query_is_unfiltered() {
        let f = FindingQuery::default().for_user().unwrap();
        assert_eq!(f, FindingFilter::default());
    }

    #[test]
    fn test_parses_all_fields() {
        let f = query(&[
            ("type", "sudden_drop"),
            ("severity", "CRITICAL"),
            ("status", "open"),
            ("from", "2024-06-01"),
            ("to", "2024-06-07T12:00:00Z"),
        ])
        .for_user()
        .unwrap();
        assert_eq!(f.kind, Some(FindingKind::SuddenDrop));
        assert_eq!(f.severity, Some(Severity::Critical));
        assert_eq!(f.status, Some(FindingStatus::Open));
        assert_eq!(
            f.detected_from.unwrap().to_rfc3339(),
            "2024-06-01T00:00:00+00:00"
        );
        assert_eq!(
            f.detected_to.unwrap().to_rfc3339(),
            "2024-06-07T12:00:00+00:00"
        );
    }

    #[test]
    fn test_unknown_values_are_validation_errors() {
        assert!(matches!(
            query(&[("severity", "loud")]).for_user(),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            query(&[("from", "yesterday")]).for_user(),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = query(&[("from", "2024-06-07"), ("to", "2024-06-01")])
            .for_user()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_bare_end_date_covers_whole_day() {
        let f = query(&[("from", "2024-06-01"), ("to", "2024-06-01")])
            .for_user()
            .unwrap();
        assert!(f.detected_from.unwrap() < f.detected_to.unwrap());
    }

    #[test]
    fn test_limits() {
        assert_eq!(query(&[("limit", "500")]).for_user().unwrap().limit, 100);
        assert_eq!(query(&[("limit", "500")]).for_fleet().unwrap().limit, 500);
        assert_eq!(query(&[("limit", "5000")]).for_fleet().unwrap().limit, 1000);
        assert_eq!(FindingQuery::default().for_fleet().unwrap().limit, 100);
        assert!(query(&[("limit", "0")]).for_fleet().is_err());
    }
}
