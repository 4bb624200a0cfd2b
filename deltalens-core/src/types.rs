//! Record types shared by the matcher, the aggregators and the KPI engine.
//!
//! | Type | Wire form | Consumed by |
//! |------|-----------|-------------|
//! | [`Event`] | `{"uid","ujt","en","et","epr","upr"}` | sessionizer, matcher, event KPIs |
//! | [`ProfileRecord`] | `{"id","pr","ia","ts"}` | custom (profile) KPIs |
//! | [`ChannelDocument`] | `{"id","source","type","timestamp","value","sp"}` | ad-channel KPIs |
//! | [`Period`] / [`PeriodPair`] | `{"from","to"}` / `{"first","second"}` | every snapshot |

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Free-form property bag attached to events, profiles and documents.
pub type Properties = serde_json::Map<String, Value>;

/// Session marker event name.
pub const SESSION_EVENT: &str = "$session";

/// Value used by filters to address a missing property.
pub const NONE_VALUE: &str = "$none";

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Properties, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Properties>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// ============================================
// Records
// ============================================

/// One tracked event. Immutable once decoded apart from [`Event::sanitize_screen_size`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "uid", default)]
    pub user_id: String,
    #[serde(rename = "ujt", default)]
    pub user_join_time: i64,
    #[serde(rename = "en", default)]
    pub name: String,
    #[serde(rename = "et", default)]
    pub timestamp: i64,
    #[serde(rename = "epr", default, deserialize_with = "null_as_empty")]
    pub event_properties: Properties,
    #[serde(rename = "upr", default, deserialize_with = "null_as_empty")]
    pub user_properties: Properties,
}

impl Event {
    /// Folds `$screen_width` and `$screen_height` into a single `$screen_size`
    /// categorical value in both property maps.
    pub fn sanitize_screen_size(&mut self) {
        sanitize_screen_size(&mut self.event_properties);
        sanitize_screen_size(&mut self.user_properties);
    }

    /// Property map for an entity.
    pub fn properties(&self, entity: PropertyEntity) -> &Properties {
        match entity {
            PropertyEntity::User => &self.user_properties,
            PropertyEntity::Event => &self.event_properties,
        }
    }

    /// Numeric event property, accepting numbers and numeric strings.
    pub fn event_number(&self, key: &str) -> Option<f64> {
        self.event_properties.get(key).and_then(value_as_f64)
    }
}

fn sanitize_screen_size(properties: &mut Properties) {
    let (Some(width), Some(height)) = (
        properties.get("$screen_width"),
        properties.get("$screen_height"),
    ) else {
        return;
    };
    let size = format!("{}x{}", format_value(width), format_value(height));
    properties.remove("$screen_width");
    properties.remove("$screen_height");
    properties.insert("$screen_size".to_string(), Value::String(size));
}

/// CRM/profile record used by custom metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "pr", default, deserialize_with = "null_as_empty")]
    pub properties: Properties,
    #[serde(rename = "ia", default)]
    pub is_anonymous: bool,
    #[serde(rename = "ts", default)]
    pub timestamp: i64,
}

/// Normalized ad-platform document (campaign, ad group, keyword reports).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelDocument {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "source", default)]
    pub channel: String,
    #[serde(rename = "type", default)]
    pub doc_type: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub value: Properties,
    #[serde(rename = "sp", default, deserialize_with = "null_as_empty")]
    pub smart_properties: Properties,
}

// ============================================
// Property entities
// ============================================

/// Which property map of an event a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyEntity {
    User,
    Event,
}

impl PropertyEntity {
    /// Short tag used inside feature keys (`up` / `ep`).
    pub fn tag(&self) -> &'static str {
        match self {
            PropertyEntity::User => "up",
            PropertyEntity::Event => "ep",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyEntity::User => "user",
            PropertyEntity::Event => "event",
        }
    }
}

impl FromStr for PropertyEntity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" | "up" | "user_g" => Ok(PropertyEntity::User),
            "event" | "ep" => Ok(PropertyEntity::Event),
            _ => Err(format!("unknown property entity: {}", s)),
        }
    }
}

impl fmt::Display for PropertyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Periods
// ============================================

/// Closed time window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub from: i64,
    pub to: i64,
}

impl Period {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// Inclusive containment check.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.from && timestamp <= self.to
    }

    /// Same-length window shifted back by `secs`.
    pub fn shifted_back(&self, secs: i64) -> Self {
        Self {
            from: self.from - secs,
            to: self.to - secs,
        }
    }

    /// UTC calendar date of the window start, `YYYYMMDD`.
    pub fn date_key(&self) -> String {
        match Utc.timestamp_opt(self.from, 0).single() {
            Some(dt) => dt.format("%Y%m%d").to_string(),
            None => self.from.to_string(),
        }
    }
}

/// Earlier and later window of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPair {
    pub first: Period,
    pub second: Period,
}

// ============================================
// Value helpers
// ============================================

/// Renders a property value the way feature tables key it: strings verbatim,
/// integral numbers without a fraction, `<nil>` for null.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "<nil>".to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format_float(n.as_f64().unwrap_or_default())
            }
        }
        other => other.to_string(),
    }
}

fn format_float(f: f64) -> String {
    let abs = f.abs();
    if f == 0.0 || (1e-4..1e21).contains(&abs) {
        return format!("{}", f);
    }
    // Exponent form with a signed two-digit exponent, e.g. 1e+21, 2.5e-07.
    let raw = format!("{:e}", f);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw,
    }
}

/// Numeric view of a property value. Numeric strings are parsed.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_event_with_null_maps() {
        let line = r#"{"uid":"u1","ujt":10,"en":"$session","et":100,"epr":null,"upr":{"$country":"IN"}}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.name, SESSION_EVENT);
        assert!(event.event_properties.is_empty());
        assert_eq!(event.user_properties["$country"], json!("IN"));
    }

    #[test]
    fn test_sanitize_screen_size() {
        let mut event = Event::default();
        event
            .user_properties
            .insert("$screen_width".into(), json!(1920));
        event
            .user_properties
            .insert("$screen_height".into(), json!(1080.0));
        event
            .event_properties
            .insert("$screen_width".into(), json!(800));
        event.sanitize_screen_size();

        assert_eq!(event.user_properties["$screen_size"], json!("1920x1080"));
        assert!(!event.user_properties.contains_key("$screen_width"));
        // Only one dimension present: left alone.
        assert!(event.event_properties.contains_key("$screen_width"));
        assert!(!event.event_properties.contains_key("$screen_size"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("Chrome")), "Chrome");
        assert_eq!(format_value(&json!(12)), "12");
        assert_eq!(format_value(&json!(12.0)), "12");
        assert_eq!(format_value(&json!(1.5)), "1.5");
        assert_eq!(format_value(&json!(true)), "true");
        assert_eq!(format_value(&Value::Null), "<nil>");
        assert_eq!(format_value(&json!(1e21)), "1e+21");
        assert_eq!(format_value(&json!(0.0000025)), "2.5e-06");
    }

    #[test]
    fn test_period_helpers() {
        // 2024-05-06T00:00:00Z
        let period = Period::new(1_714_953_600, 1_715_558_399);
        assert_eq!(period.date_key(), "20240506");
        assert!(period.contains(1_714_953_600));
        assert!(period.contains(1_715_558_399));
        assert!(!period.contains(1_715_558_400));

        let previous = period.shifted_back(604_800);
        assert_eq!(previous.date_key(), "20240429");
        assert_eq!(previous.to - previous.from, period.to - period.from);
    }

    #[test]
    fn test_property_entity_parse() {
        assert_eq!("user".parse::<PropertyEntity>(), Ok(PropertyEntity::User));
        assert_eq!("ep".parse::<PropertyEntity>(), Ok(PropertyEntity::Event));
        assert!("session".parse::<PropertyEntity>().is_err());
        assert_eq!(PropertyEntity::User.tag(), "up");
    }
}
