use reqwest::header::HeaderMap;
use serde_json::Value;

pub const VERSION_HEADER: &str = "x-version";

/// Extracts a version token from a probe response.
///
/// A non-empty `X-Version` header wins; otherwise a `version` field on a JSON
/// object body is used, with non-string values rendered as JSON text.
pub fn detect_version(headers: &HeaderMap, body: Option<&Value>) -> Option<String> {
    if let Some(value) = headers.get(VERSION_HEADER)
        && let Ok(raw) = value.to_str()
        && !raw.is_empty()
    {
        return Some(raw.to_string());
    }

    match body?.as_object()?.get("version")? {
        Value::String(version) => Some(version.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};
    use serde_json::json;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn header_takes_priority_over_body() {
        let body = json!({ "version": "1.0.0" });
        let found = detect_version(&headers(&[("X-Version", "2.0.0")]), Some(&body));
        assert_eq!(found.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let found = detect_version(&headers(&[("x-VERSION", "3.1.4")]), None);
        assert_eq!(found.as_deref(), Some("3.1.4"));
    }

    #[test]
    fn empty_header_falls_back_to_body() {
        let body = json!({ "version": "1.2.3" });
        let found = detect_version(&headers(&[("X-Version", "")]), Some(&body));
        assert_eq!(found.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn non_string_version_is_coerced() {
        let map = HeaderMap::new();
        assert_eq!(
            detect_version(&map, Some(&json!({ "version": 2 }))).as_deref(),
            Some("2")
        );
        assert_eq!(
            detect_version(&map, Some(&json!({ "version": true }))).as_deref(),
            Some("true")
        );
    }

    #[test]
    fn missing_version_yields_none() {
        let map = HeaderMap::new();
        assert_eq!(detect_version(&map, None), None);
        assert_eq!(detect_version(&map, Some(&json!({ "status": "ok" }))), None);
        assert_eq!(detect_version(&map, Some(&json!(["version"]))), None);
    }
}
