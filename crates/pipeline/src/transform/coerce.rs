//! Named value coercions used by field mappings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use ledgerflow_core::TransformFn;
use serde_json::{Number, Value};

/// Apply `f` to `value`. `Err` carries a human-readable reason.
pub fn apply(f: TransformFn, value: Value) -> Result<Value, String> {
    match f {
        TransformFn::Uppercase => Ok(map_str(value, |s| s.to_uppercase())),
        TransformFn::Lowercase => Ok(map_str(value, |s| s.to_lowercase())),
        TransformFn::Trim => Ok(map_str(value, |s| s.trim().to_string())),
        TransformFn::Number => to_number(value),
        TransformFn::Integer => to_integer(value),
        TransformFn::Boolean => to_boolean(value),
        TransformFn::String => Ok(match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }),
        TransformFn::Date => to_date(value),
    }
}

pub fn name(f: TransformFn) -> &'static str {
    match f {
        TransformFn::Uppercase => "uppercase",
        TransformFn::Lowercase => "lowercase",
        TransformFn::Trim => "trim",
        TransformFn::Number => "number",
        TransformFn::Integer => "integer",
        TransformFn::Boolean => "boolean",
        TransformFn::String => "string",
        TransformFn::Date => "date",
    }
}

// Case and whitespace functions leave non-strings untouched.
fn map_str(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn to_number(value: Value) -> Result<Value, String> {
    match value {
        Value::Number(n) => Ok(Value::Number(n)),
        Value::Bool(b) => Ok(Value::from(u8::from(b))),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{s}' is not a number"))
        }
        other => Err(format!("{other} is not a number")),
    }
}

fn to_integer(value: Value) -> Result<Value, String> {
    let float = match &value {
        Value::Number(n) if n.is_i64() || n.is_u64() => return Ok(value),
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => return Ok(Value::from(i64::from(*b))),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    };
    match float {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
        _ => Err(format!("{value} is not an integer")),
    }
}

fn to_boolean(value: Value) -> Result<Value, String> {
    match &value {
        Value::Bool(_) => Ok(value),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 0.0 => Ok(Value::Bool(false)),
            Some(x) if x == 1.0 => Ok(Value::Bool(true)),
            _ => Err(format!("{value} is not a boolean")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" => Ok(Value::Bool(true)),
            "false" | "no" | "n" | "0" | "off" => Ok(Value::Bool(false)),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        _ => Err(format!("{value} is not a boolean")),
    }
}

/// Parse common timestamp shapes into UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` (taken as UTC) and
/// Unix epochs (seconds below 10^11, milliseconds above).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
            }
            None
        }
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.abs() < 100_000_000_000 {
                Utc.timestamp_opt(raw, 0).single()
            } else {
                Utc.timestamp_millis_opt(raw).single()
            }
        }
        _ => None,
    }
}

fn to_date(value: Value) -> Result<Value, String> {
    parse_timestamp(&value)
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
        .ok_or_else(|| format!("{value} is not a recognised date"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_functions() {
        assert_eq!(apply(TransformFn::Uppercase, json!("abc")).unwrap(), json!("ABC"));
        assert_eq!(apply(TransformFn::Lowercase, json!("AbC")).unwrap(), json!("abc"));
        assert_eq!(apply(TransformFn::Trim, json!("  x ")).unwrap(), json!("x"));
        assert_eq!(apply(TransformFn::Uppercase, json!(5)).unwrap(), json!(5));
        assert_eq!(apply(TransformFn::String, json!(5)).unwrap(), json!("5"));
    }

    #[test]
    fn numeric_coercions() {
        assert_eq!(apply(TransformFn::Number, json!(" 42 ")).unwrap(), json!(42));
        assert_eq!(apply(TransformFn::Number, json!("4.5")).unwrap(), json!(4.5));
        assert!(apply(TransformFn::Number, json!("abc")).is_err());
        assert_eq!(apply(TransformFn::Integer, json!("7.0")).unwrap(), json!(7));
        assert_eq!(apply(TransformFn::Integer, json!(3.0)).unwrap(), json!(3));
        assert!(apply(TransformFn::Integer, json!("7.5")).is_err());
    }

    #[test]
    fn boolean_coercion() {
        assert_eq!(apply(TransformFn::Boolean, json!("Yes")).unwrap(), json!(true));
        assert_eq!(apply(TransformFn::Boolean, json!(0)).unwrap(), json!(false));
        assert!(apply(TransformFn::Boolean, json!("maybe")).is_err());
    }

    #[test]
    fn date_normalisation() {
        assert_eq!(
            apply(TransformFn::Date, json!("2024-03-01")).unwrap(),
            json!("2024-03-01T00:00:00Z")
        );
        assert_eq!(
            apply(TransformFn::Date, json!("2024-03-01T02:00:00+02:00")).unwrap(),
            json!("2024-03-01T00:00:00Z")
        );
        assert_eq!(apply(TransformFn::Date, json!(0)).unwrap(), json!("1970-01-01T00:00:00Z"));
        assert_eq!(
            apply(TransformFn::Date, json!(1_700_000_000_000_i64)).unwrap(),
            json!("2023-11-14T22:13:20Z")
        );
        assert!(apply(TransformFn::Date, json!("soon")).is_err());
    }
}
