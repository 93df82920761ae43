//! Records exchanged with the remote store and the mapping between wire
//! values and [`Variable`]s.
//!
//! Outcome values use this table in both directions:
//!
//! | local                  | wire                                  |
//! |------------------------|---------------------------------------|
//! | `Outcome::Value(x)`    | JSON number `x`                       |
//! | `Outcome::Violation`   | [`VIOLATION_TOKEN`] (any non-empty string decodes here) |
//! | `Outcome::Unreported`  | `null`, a missing field, or `""`      |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tl_types::{
    ExperimentId, OutcomeSpec, Outcome, ParamType, ParamValue, ParameterSpec, RemoteError,
    RemoteResult, ResultId, Scale, SettingId, TaskId, Variable, DEFAULT_UNITS, OUTCOME_RANGE,
};

/// Token sent in place of a number when the caller reports infeasibility.
pub const VIOLATION_TOKEN: &str = "-infinity";

/// One entry of the experiment listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: ExperimentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A page of a listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    /// Link to the following page, absent on the last one.
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn single(results: Vec<T>) -> Self {
        Self {
            results,
            next: None,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Remote schema record for one parameter or the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SettingId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub min: f64,
    pub max: f64,
    #[serde(default = "one")]
    pub size: usize,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_scale")]
    pub scale: String,
    #[serde(rename = "isOutput", default)]
    pub is_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentId>,
}

fn one() -> usize {
    1
}

fn default_units() -> String {
    DEFAULT_UNITS.to_string()
}

fn default_scale() -> String {
    Scale::Linear.as_str().to_string()
}

impl WireSetting {
    pub fn from_parameter(spec: &ParameterSpec) -> Self {
        Self {
            id: None,
            name: spec.name.clone(),
            kind: spec.kind.as_str().to_string(),
            min: spec.min,
            max: spec.max,
            size: spec.size,
            units: spec.units.clone(),
            scale: spec.scale.as_str().to_string(),
            is_output: false,
            experiment: None,
        }
    }

    pub fn from_outcome(spec: &OutcomeSpec) -> Self {
        Self {
            id: None,
            name: spec.name.clone(),
            kind: spec.kind.as_str().to_string(),
            min: OUTCOME_RANGE.0,
            max: OUTCOME_RANGE.1,
            size: 1,
            units: default_units(),
            scale: default_scale(),
            is_output: true,
            experiment: None,
        }
    }

    pub fn param_type(&self) -> RemoteResult<ParamType> {
        ParamType::parse(&self.kind).map_err(|e| RemoteError::InvalidResponse {
            message: format!("setting '{}': {}", self.name, e),
        })
    }

    pub fn to_parameter(&self) -> RemoteResult<ParameterSpec> {
        let scale = Scale::parse(&self.scale).map_err(|e| RemoteError::InvalidResponse {
            message: format!("setting '{}': {}", self.name, e),
        })?;
        Ok(ParameterSpec {
            name: self.name.clone(),
            kind: self.param_type()?,
            min: self.min,
            max: self.max,
            size: self.size,
            scale,
            units: self.units.clone(),
        })
    }

    pub fn to_outcome(&self) -> RemoteResult<OutcomeSpec> {
        Ok(OutcomeSpec {
            name: self.name.clone(),
            kind: self.param_type()?,
        })
    }
}

/// One variable of a result as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting: Option<SettingId>,
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// A job/result as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResult {
    pub id: ResultId,
    #[serde(default)]
    pub task: Option<TaskId>,
    #[serde(default)]
    pub variables: Vec<WireVariable>,
    #[serde(rename = "userProposed", default)]
    pub user_proposed: bool,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "runDate", default)]
    pub run_date: Option<DateTime<Utc>>,
}

impl WireResult {
    /// Suggestions come back empty until the optimizer has chosen values.
    pub fn is_filled(&self) -> bool {
        !self.variables.is_empty()
    }
}

/// Body of an add/replace result request. The server only accepts full
/// records, so a replace resubmits every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResultId>,
    pub variables: Vec<WireVariable>,
    pub task: TaskId,
    #[serde(rename = "userProposed")]
    pub user_proposed: bool,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "runDate")]
    pub run_date: DateTime<Utc>,
}

impl ResultSubmission {
    pub fn new(task: TaskId, variables: Vec<WireVariable>) -> Self {
        Self {
            id: None,
            variables,
            task,
            user_proposed: true,
            description: String::new(),
            run_date: Utc::now(),
        }
    }

    /// Rebuild a full record from what the store currently holds.
    pub fn replacing(current: &WireResult, task: TaskId, variables: Vec<WireVariable>) -> Self {
        Self {
            id: Some(current.id),
            variables,
            task: current.task.unwrap_or(task),
            user_proposed: current.user_proposed,
            description: current.description.clone(),
            run_date: Utc::now(),
        }
    }
}

pub fn encode_outcome(outcome: Outcome) -> Value {
    match outcome {
        Outcome::Unreported => Value::Null,
        Outcome::Violation => Value::String(VIOLATION_TOKEN.to_string()),
        Outcome::Value(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(VIOLATION_TOKEN.to_string())),
    }
}

pub fn decode_outcome(value: &Value) -> RemoteResult<Outcome> {
    match value {
        Value::Null => Ok(Outcome::Unreported),
        Value::String(s) if s.is_empty() => Ok(Outcome::Unreported),
        Value::String(_) => Ok(Outcome::Violation),
        Value::Number(n) => n.as_f64().map(Outcome::Value).ok_or_else(|| {
            RemoteError::InvalidResponse {
                message: format!("outcome value {n} is not representable"),
            }
        }),
        other => Err(RemoteError::InvalidResponse {
            message: format!("unexpected outcome value {other}"),
        }),
    }
}

/// Decode a parameter value, using the declared setting type when known.
/// Numeric strings are accepted since values may have been round-tripped
/// through text.
pub fn decode_param(value: &Value, kind: Option<ParamType>) -> ParamValue {
    match value {
        Value::Number(n) => number_value(n.as_i64(), n.as_f64(), kind),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) => number_value(s.trim().parse::<i64>().ok(), Some(f), kind),
            Err(_) => ParamValue::Json(value.clone()),
        },
        Value::Array(items) => {
            let numbers: Option<Vec<f64>> = items.iter().map(|v| v.as_f64()).collect();
            match numbers {
                Some(v) => ParamValue::Vector(v),
                None => ParamValue::Json(value.clone()),
            }
        }
        other => ParamValue::Json(other.clone()),
    }
}

fn number_value(as_int: Option<i64>, as_float: Option<f64>, kind: Option<ParamType>) -> ParamValue {
    match (kind, as_int, as_float) {
        (Some(ParamType::Float), _, Some(f)) => ParamValue::Float(f),
        (_, Some(i), _) => ParamValue::Int(i),
        (Some(ParamType::Integer), None, Some(f)) if f.fract() == 0.0 => ParamValue::Int(f as i64),
        (_, None, Some(f)) => ParamValue::Float(f),
        _ => ParamValue::Json(Value::Null),
    }
}

/// Resolve a wire variable into its typed form.
pub fn decode_variable(
    variable: &WireVariable,
    outcome_name: &str,
    kind: Option<ParamType>,
) -> RemoteResult<Variable> {
    if variable.name == outcome_name {
        return decode_outcome(&variable.value).map(Variable::Outcome);
    }
    Ok(Variable::Param {
        name: variable.name.clone(),
        value: decode_param(&variable.value, kind),
    })
}

pub fn encode_variable(
    variable: &Variable,
    outcome_name: &str,
    setting: Option<SettingId>,
) -> WireVariable {
    match variable {
        Variable::Param { name, value } => WireVariable {
            id: None,
            setting,
            name: name.clone(),
            value: value.to_json(),
        },
        Variable::Outcome(outcome) => WireVariable {
            id: None,
            setting,
            name: outcome_name.to_string(),
            value: encode_outcome(*outcome),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_wire_table() {
        assert_eq!(encode_outcome(Outcome::Value(2.5)), json!(2.5));
        assert_eq!(encode_outcome(Outcome::Violation), json!(VIOLATION_TOKEN));
        assert_eq!(encode_outcome(Outcome::Unreported), Value::Null);

        assert_eq!(decode_outcome(&json!(2.5)).unwrap(), Outcome::Value(2.5));
        assert_eq!(decode_outcome(&json!("-infinity")).unwrap(), Outcome::Violation);
        assert_eq!(decode_outcome(&json!("infeasible")).unwrap(), Outcome::Violation);
        assert_eq!(decode_outcome(&json!("")).unwrap(), Outcome::Unreported);
        assert_eq!(decode_outcome(&Value::Null).unwrap(), Outcome::Unreported);
        assert!(decode_outcome(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_non_finite_value_encodes_as_violation() {
        assert_eq!(encode_outcome(Outcome::Value(f64::NEG_INFINITY)), json!(VIOLATION_TOKEN));
    }

    #[test]
    fn test_params_follow_declared_type() {
        assert_eq!(decode_param(&json!(3), Some(ParamType::Integer)), ParamValue::Int(3));
        assert_eq!(decode_param(&json!(3.0), Some(ParamType::Integer)), ParamValue::Int(3));
        assert_eq!(decode_param(&json!(3), Some(ParamType::Float)), ParamValue::Float(3.0));
        assert_eq!(decode_param(&json!(0.25), None), ParamValue::Float(0.25));
        assert_eq!(decode_param(&json!("0.25"), Some(ParamType::Float)), ParamValue::Float(0.25));
        assert_eq!(decode_param(&json!([1, 2.5]), None), ParamValue::Vector(vec![1.0, 2.5]));
        assert_eq!(decode_param(&json!("relu"), None), ParamValue::Json(json!("relu")));
    }

    #[test]
    fn test_outcome_variable_is_recognised_by_name() {
        let var = WireVariable {
            id: Some(9),
            setting: Some(3),
            name: "Negative deviance".into(),
            value: json!(""),
        };
        let decoded = decode_variable(&var, "Negative deviance", None).unwrap();
        assert_eq!(decoded, Variable::Outcome(Outcome::Unreported));

        let var = WireVariable {
            name: "Lambda".into(),
            value: json!(0.1),
            ..var
        };
        let decoded = decode_variable(&var, "Negative deviance", Some(ParamType::Float)).unwrap();
        assert_eq!(
            decoded,
            Variable::Param {
                name: "Lambda".into(),
                value: ParamValue::Float(0.1)
            }
        );
    }

    #[test]
    fn test_result_uses_server_field_names() {
        let raw = json!({
            "id": 41,
            "task": 7,
            "variables": [{"id": 1, "name": "x", "value": 0.5}],
            "userProposed": false,
            "description": "",
            "runDate": null
        });
        let result: WireResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.id, 41);
        assert!(result.is_filled());

        let submission = ResultSubmission::replacing(&result, 7, result.variables.clone());
        let body = serde_json::to_value(&submission).unwrap();
        assert_eq!(body["id"], json!(41));
        assert!(body.get("userProposed").is_some());
        assert!(body.get("runDate").is_some());
    }

    #[test]
    fn test_settings_carry_output_flag() {
        let outcome = WireSetting::from_outcome(&OutcomeSpec::new("accuracy"));
        assert!(outcome.is_output);
        assert_eq!((outcome.min, outcome.max), OUTCOME_RANGE);

        let param = WireSetting::from_parameter(&ParameterSpec::integer("depth", 1, 8));
        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json["type"], json!("integer"));
        assert_eq!(json["isOutput"], json!(false));
        assert_eq!(param.to_parameter().unwrap(), ParameterSpec::integer("depth", 1, 8));
    }
}
