use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoercionError;

/// A single field of a parsed access log line.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::Str(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Str(ref s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Field name to value mapping for one matched line. Absent fields are
/// simply missing from the map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Record {
        Record::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn insert<S: Into<String>>(&mut self, field: S, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Coerces `field` to an integer when present. `-` and the empty
    /// string become `0`.
    pub fn normalize_int(&mut self, field: &'static str) -> Result<(), CoercionError> {
        if let Some(value) = self.fields.get_mut(field) {
            *value = Value::Int(coerce(field, value, 0)?);
        }
        Ok(())
    }

    /// Coerces `field` to a float when present. `-` and the empty string
    /// become `0.0`.
    pub fn normalize_float(&mut self, field: &'static str) -> Result<(), CoercionError> {
        if let Some(value) = self.fields.get_mut(field) {
            *value = Value::Float(coerce(field, value, 0.0)?);
        }
        Ok(())
    }

    /// Sets `field` from `derive` unless the record already carries it.
    /// A derivation returning `None` leaves the field unset.
    pub fn derive<F>(&mut self, field: &str, derive: F)
    where
        F: FnOnce(&Record) -> Option<Value>,
    {
        if self.contains(field) {
            return;
        }
        if let Some(value) = derive(self) {
            self.insert(field, value);
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Record {
        Record {
            fields: iter.into_iter().collect(),
        }
    }
}

fn coerce<T>(field: &'static str, value: &Value, empty: T) -> Result<T, CoercionError>
where
    T: FromStr + TryFromValue,
{
    match *value {
        Value::Str(ref s) => {
            let s = s.trim();
            if s.is_empty() || s == "-" {
                return Ok(empty);
            }
            T::from_str(s).map_err(|_| CoercionError {
                field,
                value: s.to_owned(),
            })
        }
        ref other => T::try_from_value(other).ok_or_else(|| CoercionError {
            field,
            value: other.to_string(),
        }),
    }
}

// Lets an already-normalized value pass through a second normalization.
trait TryFromValue: Sized {
    fn try_from_value(value: &Value) -> Option<Self>;
}

impl TryFromValue for i64 {
    fn try_from_value(value: &Value) -> Option<i64> {
        match *value {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl TryFromValue for f64 {
    fn try_from_value(value: &Value) -> Option<f64> {
        match *value {
            Value::Int(i) => Some(i as f64),
            Value::Float(v) => Some(v),
            Value::Str(_) => None,
        }
    }
}

/// `status // 100`, or nothing when the record has no status.
pub fn status_type(record: &Record) -> Option<Value> {
    record
        .get("status")
        .and_then(Value::as_int)
        .map(|status| Value::Int(status.div_euclid(100)))
}

/// Path component of `request_uri`, or of the URI inside a
/// `METHOD URI PROTOCOL` request line.
pub fn request_path(record: &Record) -> Option<Value> {
    let uri = if let Some(uri) = record.get("request_uri").and_then(Value::as_str) {
        uri.to_owned()
    } else if let Some(request) = record.get("request").and_then(Value::as_str) {
        let parts: Vec<&str> = request.split(' ').collect();
        if parts.len() < 3 {
            return None;
        }
        parts[1..parts.len() - 1].join(" ")
    } else {
        return None;
    };

    if uri.is_empty() {
        return None;
    }
    Some(Value::Str(uri_path(&uri).to_owned()))
}

fn uri_path(uri: &str) -> &str {
    let mut rest = match uri.find(':') {
        Some(i) if is_scheme(&uri[..i]) => &uri[i + 1..],
        _ => uri,
    };

    if let Some(end) = rest.find(|c| c == '?' || c == '#') {
        rest = &rest[..end];
    }

    // Network-path references carry an authority before the path.
    if let Some(after) = rest.strip_prefix("//") {
        rest = after.find('/').map_or("", |i| &after[i..]);
    }

    // `;params` only count on the last segment.
    let last = rest.rfind('/').map_or(0, |i| i + 1);
    match rest[last..].find(';') {
        Some(i) => &rest[..last + i],
        None => rest,
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &str)]) -> Record {
        fields
            .iter()
            .map(|&(k, v)| (k.to_owned(), Value::Str(v.to_owned())))
            .collect()
    }

    #[test]
    fn it_normalizes_sentinels_to_zero() {
        let mut r = record(&[("status", "-"), ("bytes_sent", ""), ("request_time", "-")]);

        r.normalize_int("status").unwrap();
        r.normalize_int("bytes_sent").unwrap();
        r.normalize_float("request_time").unwrap();

        assert_eq!(r.get("status"), Some(&Value::Int(0)));
        assert_eq!(r.get("bytes_sent"), Some(&Value::Int(0)));
        assert_eq!(r.get("request_time"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn it_rejects_non_numeric_status() {
        let mut r = record(&[("status", "abc")]);

        assert_eq!(
            r.normalize_int("status"),
            Err(CoercionError {
                field: "status",
                value: "abc".to_owned()
            })
        );
    }

    #[test]
    fn it_leaves_absent_fields_unset() {
        let mut r = record(&[("remote_addr", "127.0.0.1")]);

        r.normalize_int("status").unwrap();
        r.derive("status_type", status_type);
        r.derive("request_path", request_path);

        assert!(!r.contains("status"));
        assert!(!r.contains("status_type"));
        assert!(!r.contains("request_path"));
    }

    #[test]
    fn it_derives_status_type() {
        let mut r = record(&[("status", "404")]);
        r.normalize_int("status").unwrap();
        r.derive("status_type", status_type);

        assert_eq!(r.get("status_type"), Some(&Value::Int(4)));
    }

    #[test]
    fn derive_keeps_existing_field() {
        let mut r = record(&[("bytes_sent", "10"), ("body_bytes_sent", "7")]);
        r.derive("bytes_sent", |r| r.get("body_bytes_sent").cloned());

        assert_eq!(r.get("bytes_sent"), Some(&Value::Str("10".to_owned())));
    }

    #[test]
    fn it_extracts_path_from_request_line() {
        let r = record(&[("request", "GET /a/b?x=1 HTTP/1.1")]);

        assert_eq!(request_path(&r), Some(Value::Str("/a/b".to_owned())));
    }

    #[test]
    fn it_prefers_request_uri() {
        let r = record(&[("request_uri", "/u#frag"), ("request", "GET /a HTTP/1.1")]);

        assert_eq!(request_path(&r), Some(Value::Str("/u".to_owned())));
    }

    #[test]
    fn it_strips_scheme_and_authority() {
        assert_eq!(uri_path("http://example.com/p/q?z"), "/p/q");
        assert_eq!(uri_path("https://example.com"), "");
        assert_eq!(uri_path("/plain"), "/plain");
    }

    #[test]
    fn it_drops_params_from_the_last_segment() {
        let r = record(&[("request", "GET /login;jsessionid=ABC?x=1 HTTP/1.1")]);

        assert_eq!(request_path(&r), Some(Value::Str("/login".to_owned())));
        assert_eq!(uri_path("/a/b;c/d"), "/a/b;c/d");
        assert_eq!(uri_path("/a/b;c/d;e"), "/a/b;c/d");
    }

    #[test]
    fn it_drops_network_path_authority() {
        let r = record(&[("request", "GET //evil/p?q HTTP/1.1")]);

        assert_eq!(request_path(&r), Some(Value::Str("/p".to_owned())));
        assert_eq!(uri_path("//host"), "");
    }

    #[test]
    fn malformed_request_line_has_no_path() {
        let r = record(&[("request", "garbage")]);

        assert_eq!(request_path(&r), None);
    }
}
