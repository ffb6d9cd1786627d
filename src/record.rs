use chrono::{Local, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Open set of additional fields attached to a record by the caller.
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

/// Ordinal urgency of a record, 0 (most severe) to 7 (least severe).
///
/// `Alert` is the default for unclassified errors, `Error` for generic
/// errors and `Informational` for info reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Informational = 6,
    Debug = 7,
}

impl Severity {
    /// Numeric wire level of this severity.
    pub fn as_level(self) -> u8 {
        self as u8
    }
}

/// Canonical wire record produced by [`build_record`].
///
/// Serializes to the GELF-style shape
/// `{version, host, timestamp, short_message, full_message, level,
/// _env, _localeDate, _app_name, _<extraKey>...}`. Built once per
/// report call and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub version: String,
    pub host: String,
    /// Seconds since the epoch, with fractional milliseconds.
    pub timestamp: f64,
    pub short_message: String,
    pub full_message: String,
    pub level: u8,
    #[serde(rename = "_env")]
    pub env: String,
    #[serde(rename = "_localeDate")]
    pub locale_date: String,
    #[serde(rename = "_app_name")]
    pub app_name: String,
    /// Additional fields, keys already `_`-prefixed.
    #[serde(flatten)]
    pub additional: ExtraFields,
}

/// Per-reporter context baked into every record.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub host: String,
    pub env: String,
    pub app_name: String,
}

const PROTOCOL_VERSION: &str = "1.1";

// Fixed fields that a prefixed extra key must not shadow.
const RESERVED: [&str; 3] = ["_env", "_localeDate", "_app_name"];

/// Build a [`LogRecord`] from a message pair, extra fields and severity.
///
/// Pure and stateless: extra keys are namespaced with a `_` prefix so
/// they cannot collide with the fixed fields (a key that would still
/// shadow a reserved field gets a second underscore), an empty full
/// message falls back to the short one. No failure modes.
pub fn build_record(
    short: &str,
    full: &str,
    extra: Option<&ExtraFields>,
    severity: Severity,
    ctx: &RecordContext,
) -> LogRecord {
    let mut additional = ExtraFields::new();
    if let Some(extra) = extra {
        for (key, value) in extra {
            let mut prefixed = format!("_{}", key.trim_start_matches('_'));
            if RESERVED.contains(&prefixed.as_str()) {
                prefixed.insert(0, '_');
            }
            additional.insert(prefixed, value.clone());
        }
    }

    let full = if full.is_empty() { short } else { full };

    LogRecord {
        version: PROTOCOL_VERSION.to_string(),
        host: ctx.host.clone(),
        timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        short_message: short.to_string(),
        full_message: full.to_string(),
        level: severity.as_level(),
        env: ctx.env.clone(),
        locale_date: Local::now().format("%c").to_string(),
        app_name: ctx.app_name.clone(),
        additional,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RecordContext {
        RecordContext {
            host: "unit-host".to_string(),
            env: "test".to_string(),
            app_name: "relay-tests".to_string(),
        }
    }

    #[test]
    fn wire_shape_has_reserved_names_and_prefixed_extras() {
        let mut extra = ExtraFields::new();
        extra.insert("component".to_string(), json!("writer"));

        let record = build_record("Disk full", "stack...", Some(&extra), Severity::Error, &ctx());
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["version"], "1.1");
        assert_eq!(value["host"], "unit-host");
        assert_eq!(value["short_message"], "Disk full");
        assert_eq!(value["full_message"], "stack...");
        assert_eq!(value["level"], 3);
        assert_eq!(value["_env"], "test");
        assert_eq!(value["_app_name"], "relay-tests");
        assert_eq!(value["_component"], "writer");
        assert!(value.get("_localeDate").is_some());
        assert!(value.get("component").is_none());
    }

    #[test]
    fn already_prefixed_keys_are_not_doubled() {
        let mut extra = ExtraFields::new();
        extra.insert("_user".to_string(), json!("alice"));

        let record = build_record("m", "f", Some(&extra), Severity::Informational, &ctx());
        assert_eq!(record.additional.get("_user"), Some(&json!("alice")));
    }

    #[test]
    fn reserved_collisions_get_extra_underscore() {
        let mut extra = ExtraFields::new();
        extra.insert("env".to_string(), json!("spoof"));
        extra.insert("app_name".to_string(), json!("spoof"));

        let record = build_record("m", "f", Some(&extra), Severity::Error, &ctx());
        assert_eq!(record.additional.get("__env"), Some(&json!("spoof")));
        assert_eq!(record.additional.get("__app_name"), Some(&json!("spoof")));
        assert_eq!(record.env, "test");
    }

    #[test]
    fn empty_full_message_falls_back_to_short() {
        let record = build_record("oops", "", None, Severity::Alert, &ctx());
        assert_eq!(record.full_message, "oops");
        assert_eq!(record.level, 1);
    }

    #[test]
    fn severity_levels_cover_the_scale() {
        assert_eq!(Severity::Emergency.as_level(), 0);
        assert_eq!(Severity::Alert.as_level(), 1);
        assert_eq!(Severity::Critical.as_level(), 2);
        assert_eq!(Severity::Error.as_level(), 3);
        assert_eq!(Severity::Warning.as_level(), 4);
        assert_eq!(Severity::Notice.as_level(), 5);
        assert_eq!(Severity::Informational.as_level(), 6);
        assert_eq!(Severity::Debug.as_level(), 7);
    }

    #[test]
    fn timestamp_is_fractional_seconds() {
        let before = Utc::now().timestamp_millis() as f64 / 1000.0;
        let record = build_record("t", "t", None, Severity::Debug, &ctx());
        let after = Utc::now().timestamp_millis() as f64 / 1000.0;
        assert!(record.timestamp >= before && record.timestamp <= after);
    }
}
