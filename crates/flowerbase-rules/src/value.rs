//! Loose value semantics used by rule operators
//!
//! Rule files are authored against JavaScript-like semantics: a single
//! number type, truthiness, `String(x)` coercion and lenient numeric
//! parsing. These helpers give BSON values that behaviour.

use bson::{Bson, Document};

/// Resolve a dotted path against a document
///
/// An exact key match wins over traversal, so tokens such as `%%user.id`
/// stored verbatim still resolve. Numeric segments index into arrays.
pub fn get_path<'a>(data: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = data.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Numeric view of a BSON scalar, if it is a number
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}

/// Strict equality with a single number type
///
/// Numbers compare by value across BSON widths; everything else compares
/// structurally. A missing value only equals `undefined`.
pub fn strict_eq(actual: Option<&Bson>, expected: Option<&Bson>) -> bool {
    match (actual, expected) {
        (None | Some(Bson::Undefined), None | Some(Bson::Undefined)) => true,
        (None, _) | (_, None) => false,
        (Some(a), Some(b)) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            (None, None) => a == b,
            _ => false,
        },
    }
}

/// Whether a value counts as empty for `$exists`
///
/// Missing and null are empty; code is never empty; strings are empty when
/// whitespace-only; arrays and documents when they have no entries; dates
/// and other scalars never are.
pub fn is_empty(value: Option<&Bson>) -> bool {
    match value {
        None | Some(Bson::Null | Bson::Undefined) => true,
        Some(Bson::String(s)) => s.trim().is_empty(),
        Some(Bson::Array(items)) => items.is_empty(),
        Some(Bson::Document(doc)) => doc.is_empty(),
        Some(_) => false,
    }
}

/// JavaScript truthiness
pub fn truthy(value: Option<&Bson>) -> bool {
    match value {
        None | Some(Bson::Null | Bson::Undefined) => false,
        Some(Bson::Boolean(b)) => *b,
        Some(Bson::String(s)) => !s.is_empty(),
        Some(other) => match as_f64(other) {
            Some(n) => n != 0.0 && !n.is_nan(),
            None => true,
        },
    }
}

/// `forceNumber`: arrays count their length, numeric strings parse, numbers
/// pass through, anything else is zero
pub fn force_number(value: Option<&Bson>) -> f64 {
    match value {
        Some(Bson::Array(items)) => items.len() as f64,
        Some(Bson::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(other) => as_f64(other).unwrap_or(0.0),
        None => 0.0,
    }
}

/// `forceArray`: arrays yield their items, a missing value yields nothing,
/// anything else is a one-element list
pub fn force_array(value: Option<&Bson>) -> Vec<&Bson> {
    match value {
        Some(Bson::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// `parseFloat`: numbers pass through, strings parse their longest numeric
/// prefix, everything else is NaN
pub fn parse_float(value: Option<&Bson>) -> f64 {
    match value {
        Some(Bson::String(s)) => parse_float_prefix(s),
        Some(other) => as_f64(other).unwrap_or(f64::NAN),
        None => f64::NAN,
    }
}

fn parse_float_prefix(input: &str) -> f64 {
    let s = input.trim_start();
    let unsigned = s.trim_start_matches(['+', '-']);
    if unsigned.starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let mut digits = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().unwrap_or(f64::NAN)
}

/// `String(x)` coercion
pub fn js_string(value: Option<&Bson>) -> String {
    match value {
        None | Some(Bson::Undefined) => "undefined".to_string(),
        Some(Bson::Null) => "null".to_string(),
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::Boolean(b)) => b.to_string(),
        Some(Bson::Array(items)) => items
            .iter()
            .map(|item| match item {
                Bson::Null | Bson::Undefined => String::new(),
                other => js_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Bson::Document(_)) => "[object Object]".to_string(),
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::RegularExpression(re)) => format!("/{}/{}", re.pattern, re.options),
        Some(other) => match as_f64(other) {
            Some(n) => format_number(n),
            None => other.to_string(),
        },
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// Length of `String(x)` in UTF-16 code units
pub fn js_string_length(value: Option<&Bson>) -> usize {
    js_string(value).encode_utf16().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId, DateTime};

    #[test]
    fn test_get_path() {
        let data = doc! {
            "a": { "b": { "c": 1 } },
            "items": [ { "name": "x" } ],
            "%%user.id": "literal",
        };
        assert_eq!(get_path(&data, "a.b.c"), Some(&Bson::Int32(1)));
        assert_eq!(get_path(&data, "items.0.name"), Some(&Bson::String("x".into())));
        assert_eq!(get_path(&data, "%%user.id"), Some(&Bson::String("literal".into())));
        assert_eq!(get_path(&data, "a.missing"), None);
        assert_eq!(get_path(&data, "a.b.c.d"), None);
    }

    #[test]
    fn test_strict_eq_numbers() {
        assert!(strict_eq(Some(&Bson::Int32(1)), Some(&Bson::Double(1.0))));
        assert!(strict_eq(Some(&Bson::Int64(7)), Some(&Bson::Int32(7))));
        assert!(!strict_eq(Some(&Bson::Int32(1)), Some(&Bson::String("1".into()))));
        assert!(!strict_eq(None, Some(&Bson::Null)));
        assert!(strict_eq(None, None));
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(None));
        assert!(is_empty(Some(&Bson::Null)));
        assert!(is_empty(Some(&Bson::String("".into()))));
        assert!(is_empty(Some(&Bson::String("   ".into()))));
        assert!(!is_empty(Some(&Bson::String("x".into()))));
        assert!(!is_empty(Some(&Bson::Int32(0))));
        assert!(is_empty(Some(&Bson::Array(vec![]))));
        assert!(!is_empty(Some(&Bson::Array(vec![Bson::Int32(1)]))));
        assert!(is_empty(Some(&Bson::Document(doc! {}))));
        assert!(!is_empty(Some(&Bson::Document(doc! { "a": 1 }))));
        assert!(!is_empty(Some(&Bson::DateTime(DateTime::now()))));
        assert!(!is_empty(Some(&Bson::JavaScriptCode("() => 1".into()))));
        assert!(!is_empty(Some(&Bson::ObjectId(ObjectId::new()))));
    }

    #[test]
    fn test_force_number() {
        assert_eq!(force_number(Some(&Bson::Array(vec![Bson::Null, Bson::Null]))), 2.0);
        assert_eq!(force_number(Some(&Bson::String("3.5".into()))), 3.5);
        assert_eq!(force_number(Some(&Bson::String("abc".into()))), 0.0);
        assert_eq!(force_number(Some(&Bson::Int32(4))), 4.0);
        assert_eq!(force_number(Some(&Bson::Boolean(true))), 0.0);
        assert_eq!(force_number(None), 0.0);
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(Some(&Bson::String("12px".into()))), 12.0);
        assert_eq!(parse_float(Some(&Bson::String("  -1.5e2x".into()))), -150.0);
        assert_eq!(parse_float(Some(&Bson::String(".5".into()))), 0.5);
        assert_eq!(parse_float(Some(&Bson::String("1e".into()))), 1.0);
        assert!(parse_float(Some(&Bson::String("px".into()))).is_nan());
        assert!(parse_float(None).is_nan());
        assert_eq!(parse_float(Some(&Bson::Int64(9))), 9.0);
    }

    #[test]
    fn test_js_string() {
        assert_eq!(js_string(Some(&Bson::Int32(42))), "42");
        assert_eq!(js_string(Some(&Bson::Double(1.5))), "1.5");
        assert_eq!(
            js_string(Some(&Bson::Array(vec![Bson::Int32(1), Bson::Null, Bson::String("a".into())]))),
            "1,,a"
        );
        assert_eq!(js_string(None), "undefined");
        assert_eq!(js_string_length(Some(&Bson::String("héllo".into()))), 5);
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&Bson::Int32(0))));
        assert!(!truthy(Some(&Bson::String(String::new()))));
        assert!(truthy(Some(&Bson::Document(doc! {}))));
        assert!(truthy(Some(&Bson::Boolean(true))));
    }
}
