//! Parameter values and the tolerant equality used to identify jobs by value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Absolute tolerance for numeric fields. Values pass through a textual
/// round-trip on the wire and must not spuriously mismatch.
pub const VALUE_TOLERANCE: f64 = 1e-10;

/// A concrete parameter value reported by, or sent to, the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    /// Vector-valued parameter (setting size > 1).
    Vector(Vec<f64>),
    Json(serde_json::Value),
}

impl ParamValue {
    /// Numeric view of scalar values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(serde_json::Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// Equality with [`VALUE_TOLERANCE`] on numeric fields, exact otherwise.
    pub fn approx_eq(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (Self::Vector(a), Self::Vector(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| (x - y).abs() <= VALUE_TOLERANCE)
            }
            (Self::Json(a), Self::Json(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() <= VALUE_TOLERANCE,
                _ => false,
            },
        }
    }

    /// Convert to the JSON representation sent on the wire.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Vector(v) => serde_json::Value::from(v.clone()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Vector(v) => write!(f, "{v:?}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One concrete assignment of parameter values, keyed by parameter name.
/// Ordered so that iteration (and therefore wire submission) is stable.
pub type Assignment = BTreeMap<String, ParamValue>;

/// Two assignments match iff they carry the same names and every pair of
/// values is [`ParamValue::approx_eq`].
pub fn assignments_match(a: &Assignment, b: &Assignment) -> bool {
    a.len() == b.len()
        && a.iter().all(|(name, value)| {
            b.get(name)
                .map(|other| value.approx_eq(other))
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(pairs: &[(&str, ParamValue)]) -> Assignment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_numeric_values_match_within_tolerance() {
        let a = ParamValue::Float(0.1 + 0.2);
        let b = ParamValue::Float(0.3);
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&ParamValue::Float(0.3 + 1e-6)));
    }

    #[test]
    fn test_int_and_float_compare_numerically() {
        assert!(ParamValue::Int(4).approx_eq(&ParamValue::Float(4.0)));
        assert!(!ParamValue::Int(4).approx_eq(&ParamValue::Float(4.5)));
    }

    #[test]
    fn test_non_numeric_values_need_exact_match() {
        let a = ParamValue::Json(serde_json::json!("adam"));
        assert!(a.approx_eq(&ParamValue::Json(serde_json::json!("adam"))));
        assert!(!a.approx_eq(&ParamValue::Json(serde_json::json!("sgd"))));
        assert!(!a.approx_eq(&ParamValue::Float(1.0)));
    }

    #[test]
    fn test_vectors_compare_elementwise() {
        let a = ParamValue::Vector(vec![1.0, 2.0]);
        assert!(a.approx_eq(&ParamValue::Vector(vec![1.0, 2.0 + 1e-12])));
        assert!(!a.approx_eq(&ParamValue::Vector(vec![1.0])));
    }

    #[test]
    fn test_assignments_require_same_names() {
        let a = assignment(&[("lr", 0.01.into()), ("depth", 3i64.into())]);
        let b = assignment(&[("lr", 0.01.into()), ("depth", 3.0.into())]);
        let c = assignment(&[("lr", 0.01.into())]);
        let d = assignment(&[("lr", 0.01.into()), ("width", 3i64.into())]);

        assert!(assignments_match(&a, &b));
        assert!(!assignments_match(&a, &c));
        assert!(!assignments_match(&a, &d));
    }

    #[test]
    fn test_textual_round_trip_stays_equal() {
        let original = assignment(&[
            ("Lambda", ParamValue::Float(0.123456789012345)),
            ("Alpha", ParamValue::Float(1e-4)),
        ]);
        let json = serde_json::to_string(&original).unwrap();
        let back: Assignment = serde_json::from_str(&json).unwrap();
        assert!(assignments_match(&original, &back));
    }
}
