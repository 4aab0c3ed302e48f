//! Runtime value semantics on top of [`serde_json::Value`].

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

/// Data context handed to templates.
pub type Data = Map<String, Value>;

/// String form of a value as written to template output.
///
/// `null` renders as an empty string, arrays are joined with `,` and objects
/// are rendered as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

fn format_number(number: &Number) -> String {
    match number.as_f64() {
        Some(f) if number.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => number.to_string(),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() { Some(0.0) } else { trimmed.parse().ok() }
        }
        _ => None,
    }
}

/// Build a number value, keeping integers integral.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Equality used by `==`: numbers compare numerically, everything else structurally.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Ordering used by `<`, `>`, `<=` and `>=`.
///
/// Two strings compare lexicographically; otherwise both sides are converted
/// to numbers. Returns `None` when the values are not comparable.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => to_number(left)?.partial_cmp(&to_number(right)?),
    }
}

/// `+`: concatenates when either side is a string, adds numbers otherwise.
pub fn add_values(left: &Value, right: &Value) -> Option<Value> {
    if left.is_string() || right.is_string() {
        return Some(Value::String(format!("{}{}", stringify(left), stringify(right))));
    }
    Some(number_value(to_number(left)? + to_number(right)?))
}

/// Length of a string (in characters), array or object.
pub fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

/// Human readable type name used in runtime error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stringify() {
        assert_eq!(stringify(&Value::Null), "");
        assert_eq!(stringify(&json!(3.0)), "3");
        assert_eq!(stringify(&json!(2.5)), "2.5");
        assert_eq!(stringify(&json!(["a", 1, true])), "a,1,true");
        assert_eq!(stringify(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!("0")));
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(add_values(&json!(1), &json!(2)), Some(json!(3)));
        assert_eq!(add_values(&json!("a"), &json!(1)), Some(json!("a1")));
        assert_eq!(compare_values(&json!(2), &json!("10")), Some(Ordering::Less));
        assert_eq!(compare_values(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert!(values_equal(&json!(1), &json!(1.0)));
    }
}
