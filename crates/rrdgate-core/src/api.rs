//! Inbound request shapes for the dashboard JSON endpoints.
//!
//! These mirror what the simple-JSON datasource posts; unknown fields
//! (panel ids, interval hints, raw ranges) are ignored on decode.

use chrono::DateTime;
use serde::Deserialize;

/// Body of `/search` and `/ls`: a single pattern or prefix.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub target: String,
}

/// The `range` object of a query or annotation request, RFC 3339 bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

/// One entry of a query's `targets` array.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryTarget {
    #[serde(default)]
    pub target: String,
}

/// Body of `/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub range: TimeRange,
    #[serde(default)]
    pub targets: Vec<QueryTarget>,
}

impl QueryRequest {
    /// Target strings in request order.
    pub fn target_strings(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.target.clone()).collect()
    }
}

/// Body of `/annotations`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationRequest {
    pub range: TimeRange,
}

/// Parses an RFC 3339 timestamp to epoch seconds, dropping any
/// sub-second part.
pub fn parse_time(value: &str) -> Result<i64, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_request_ignores_dashboard_extras() {
        let body = r#"{
            "panelId": 1,
            "range": {
                "from": "2016-10-31T06:33:44.866Z",
                "to": "2016-10-31T12:33:44.866Z",
                "raw": {"from": "now-6h", "to": "now"}
            },
            "interval": "30s",
            "intervalMs": 30000,
            "targets": [
                {"target": "host1:cpu:used", "refId": "A", "type": "timeserie"}
            ],
            "maxDataPoints": 550
        }"#;

        let req: QueryRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.range.from, "2016-10-31T06:33:44.866Z");
        assert_eq!(req.target_strings(), vec!["host1:cpu:used"]);
    }

    #[test]
    fn test_query_request_targets_default_to_empty() {
        let body = r#"{"range": {"from": "1970-01-02T00:00:00Z", "to": "1970-01-03T00:00:00Z"}}"#;
        let req: QueryRequest = serde_json::from_str(body).unwrap();
        assert!(req.targets.is_empty());
    }

    #[test]
    fn test_search_request_target_defaults_to_empty() {
        let req: SearchRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.target, "");
    }

    #[test]
    fn test_parse_time_utc_and_offset() {
        assert_eq!(parse_time("1970-01-02T00:00:00Z").unwrap(), 86_400);
        assert_eq!(parse_time("2001-09-09T01:46:40Z").unwrap(), 1_000_000_000);
        assert_eq!(parse_time("1970-01-01T02:00:00+02:00").unwrap(), 0);
        assert_eq!(parse_time("1970-01-02T00:00:00.500Z").unwrap(), 86_400);
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("yesterday").is_err());
    }
}
