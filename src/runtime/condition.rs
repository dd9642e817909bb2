/// Edge condition evaluation
///
/// Resolves a dot path into a node's output and compares it with the
/// condition's value. Shared by conditional edges and the `condition` node.

use crate::workflow::{ConditionOperator, EdgeCondition};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// Resolve a dot path ("order.items.0.sku") against a JSON value
///
/// Numeric segments index into arrays. An empty path returns the value itself.
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }

    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate a condition against a node's output (absent output reads as null)
pub fn evaluate(condition: &EdgeCondition, data: Option<&Value>) -> bool {
    let actual = data
        .and_then(|d| resolve_path(d, &condition.field))
        .unwrap_or(&Value::Null);
    compare(actual, condition.operator, &condition.value)
}

/// Apply one operator to a resolved field value
pub fn compare(actual: &Value, operator: ConditionOperator, expected: &Value) -> bool {
    match operator {
        ConditionOperator::Eq => loose_eq(actual, expected),
        ConditionOperator::Neq => !loose_eq(actual, expected),
        ConditionOperator::Gt => ordering(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(ordering(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        ConditionOperator::Lt => ordering(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(ordering(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        ConditionOperator::Contains => coerce_string(actual).contains(&coerce_string(expected)),
        ConditionOperator::Regex => {
            let pattern = coerce_string(expected);
            match Regex::new(&pattern) {
                Ok(re) => re.is_match(&coerce_string(actual)),
                Err(e) => {
                    tracing::warn!("⚠️ Invalid regex in condition '{}': {}", pattern, e);
                    false
                }
            }
        }
        ConditionOperator::Unknown => true,
    }
}

/// Equality that treats numbers numerically and numeric strings as numbers
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(flag), Value::String(s)) | (Value::String(s), Value::Bool(flag)) => {
            match s.to_lowercase().as_str() {
                "true" => *flag,
                "false" => !*flag,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Numeric ordering when both sides coerce to numbers, string ordering otherwise
fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> EdgeCondition {
        EdgeCondition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn resolves_nested_paths_and_indices() {
        let data = json!({ "order": { "items": [{ "sku": "A-1" }] } });
        assert_eq!(resolve_path(&data, "order.items.0.sku"), Some(&json!("A-1")));
        assert_eq!(resolve_path(&data, "order.missing"), None);
        assert_eq!(resolve_path(&data, ""), Some(&data));
    }

    #[test]
    fn comparison_operators_follow_numeric_order() {
        let data = json!({ "total": 150 });
        assert!(evaluate(&cond("total", ConditionOperator::Gt, json!(100)), Some(&data)));
        assert!(evaluate(&cond("total", ConditionOperator::Gte, json!(150)), Some(&data)));
        assert!(!evaluate(&cond("total", ConditionOperator::Lt, json!(150)), Some(&data)));
        assert!(evaluate(&cond("total", ConditionOperator::Lte, json!("150")), Some(&data)));
        assert!(evaluate(&cond("total", ConditionOperator::Eq, json!(150.0)), Some(&data)));
        assert!(evaluate(&cond("total", ConditionOperator::Neq, json!(1)), Some(&data)));
    }

    #[test]
    fn contains_coerces_to_string() {
        let data = json!({ "msg": "order 42 shipped", "code": 12345 });
        assert!(evaluate(&cond("msg", ConditionOperator::Contains, json!("shipped")), Some(&data)));
        assert!(evaluate(&cond("code", ConditionOperator::Contains, json!(234)), Some(&data)));
        assert!(!evaluate(&cond("msg", ConditionOperator::Contains, json!("lost")), Some(&data)));
    }

    #[test]
    fn regex_matches_field_and_rejects_bad_patterns() {
        let data = json!({ "email": "ops@example.com" });
        assert!(evaluate(&cond("email", ConditionOperator::Regex, json!(r"^\w+@example\.com$")), Some(&data)));
        assert!(!evaluate(&cond("email", ConditionOperator::Regex, json!("(")), Some(&data)));
    }

    #[test]
    fn unknown_operator_passes() {
        assert!(evaluate(&cond("x", ConditionOperator::Unknown, json!(1)), None));
    }

    #[test]
    fn absent_output_reads_as_null() {
        assert!(!evaluate(&cond("x", ConditionOperator::Eq, json!(1)), None));
        assert!(evaluate(&cond("x", ConditionOperator::Eq, Value::Null), None));
    }
}
