//! Experiment, parameter and outcome definitions with local validation.
//!
//! Everything here is checked before any request leaves the process; a
//! malformed schema always fails with [`crate::TlError::Validation`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TlResult;
use crate::validation_error;

/// Remote identifier of an experiment.
pub type ExperimentId = i64;

/// Remote identifier of a setting (one parameter or the outcome).
pub type SettingId = i64;

/// Default units attached to parameters and the outcome.
pub const DEFAULT_UNITS: &str = "Reals";

/// Fixed representation range the server stores the outcome setting with.
pub const OUTCOME_RANGE: (f64, f64) = (-100.0, 100.0);

const PARAMETER_PROPERTIES: &[&str] = &["type", "min", "max", "size", "scale", "units"];
const REQUIRED_PARAMETER_PROPERTIES: &[&str] = &["min", "max"];
const OUTCOME_PROPERTIES: &[&str] = &["name", "type"];

/// Declared numeric type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Float,
    Integer,
}

impl Default for ParamType {
    fn default() -> Self {
        Self::Float
    }
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
        }
    }

    pub fn parse(s: &str) -> TlResult<Self> {
        match s {
            "float" => Ok(Self::Float),
            "int" | "integer" => Ok(Self::Integer),
            other => Err(validation_error!("unsupported parameter type '{}'", other)),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the optimizer should treat the range of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Linear,
    Log,
}

impl Default for Scale {
    fn default() -> Self {
        Self::Linear
    }
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Log => "log",
        }
    }

    pub fn parse(s: &str) -> TlResult<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "log" => Ok(Self::Log),
            other => Err(validation_error!("unsupported scale '{}'", other)),
        }
    }
}

/// A single tunable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParamType,
    pub min: f64,
    pub max: f64,
    /// Vector length; 1 for scalar parameters.
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default)]
    pub scale: Scale,
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_size() -> usize {
    1
}

fn default_units() -> String {
    DEFAULT_UNITS.to_string()
}

impl ParameterSpec {
    pub fn float(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParamType::Float,
            min,
            max,
            size: 1,
            scale: Scale::Linear,
            units: default_units(),
        }
    }

    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            kind: ParamType::Integer,
            ..Self::float(name, min as f64, max as f64)
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Build a parameter from a loosely-typed property map, rejecting
    /// unknown properties and missing bounds.
    pub fn from_properties(
        name: &str,
        props: &serde_json::Map<String, serde_json::Value>,
    ) -> TlResult<Self> {
        for key in props.keys() {
            if !PARAMETER_PROPERTIES.contains(&key.as_str()) {
                return Err(validation_error!(
                    "parameter '{}': unsupported property '{}'",
                    name,
                    key
                ));
            }
        }
        for key in REQUIRED_PARAMETER_PROPERTIES {
            if !props.contains_key(*key) {
                return Err(validation_error!(
                    "parameter '{}': missing required property '{}'",
                    name,
                    key
                ));
            }
        }

        let mut spec = Self::float(
            name,
            number_property(name, props, "min")?,
            number_property(name, props, "max")?,
        );
        if let Some(kind) = text_property(name, props, "type")? {
            spec.kind = ParamType::parse(kind)?;
        }
        if let Some(scale) = text_property(name, props, "scale")? {
            spec.scale = Scale::parse(scale)?;
        }
        if let Some(units) = text_property(name, props, "units")? {
            spec.units = units.to_string();
        }
        if let Some(size) = props.get("size") {
            spec.size = size
                .as_u64()
                .ok_or_else(|| {
                    validation_error!("parameter '{}': 'size' must be a positive integer", name)
                })? as usize;
        }

        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> TlResult<()> {
        if self.name.trim().is_empty() {
            return Err(validation_error!("parameter name must not be empty"));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(validation_error!(
                "parameter '{}': bounds must be finite, got [{}, {}]",
                self.name,
                self.min,
                self.max
            ));
        }
        if self.min >= self.max {
            return Err(validation_error!(
                "parameter '{}': min {} must be below max {}",
                self.name,
                self.min,
                self.max
            ));
        }
        if self.size < 1 {
            return Err(validation_error!("parameter '{}': size must be at least 1", self.name));
        }
        if self.scale == Scale::Log && self.min <= 0.0 {
            return Err(validation_error!(
                "parameter '{}': log scale needs a positive lower bound",
                self.name
            ));
        }
        if self.kind == ParamType::Integer && (self.min.fract() != 0.0 || self.max.fract() != 0.0) {
            return Err(validation_error!(
                "parameter '{}': integer bounds must be whole numbers",
                self.name
            ));
        }
        Ok(())
    }
}

fn number_property(
    name: &str,
    props: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> TlResult<f64> {
    props
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| validation_error!("parameter '{}': '{}' must be a number", name, key))
}

fn text_property<'a>(
    name: &str,
    props: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> TlResult<Option<&'a str>> {
    match props.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| validation_error!("parameter '{}': '{}' must be a string", name, key)),
    }
}

/// The single scalar quantity an experiment maximizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParamType,
}

impl OutcomeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamType::Float,
        }
    }

    pub fn from_properties(props: &serde_json::Map<String, serde_json::Value>) -> TlResult<Self> {
        for key in props.keys() {
            if !OUTCOME_PROPERTIES.contains(&key.as_str()) {
                return Err(validation_error!("outcome: unsupported property '{}'", key));
            }
        }
        let name = props
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| validation_error!("outcome: missing required property 'name'"))?;
        let mut outcome = Self::new(name);
        if let Some(kind) = props.get("type").and_then(|v| v.as_str()) {
            outcome.kind = ParamType::parse(kind)?;
        }
        outcome.validate()?;
        Ok(outcome)
    }

    pub fn validate(&self) -> TlResult<()> {
        if self.name.trim().is_empty() {
            return Err(validation_error!("outcome name must not be empty"));
        }
        Ok(())
    }
}

/// Everything needed to create an experiment remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ordered parameter definitions.
    pub parameters: Vec<ParameterSpec>,
    pub outcome: OutcomeSpec,
}

impl ExperimentSpec {
    pub fn new(name: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            outcome: OutcomeSpec::new(outcome),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn add_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn add_float(self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.add_parameter(ParameterSpec::float(name, min, max))
    }

    pub fn add_int(self, name: impl Into<String>, min: i64, max: i64) -> Self {
        self.add_parameter(ParameterSpec::integer(name, min, max))
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parse the on-disk experiment description:
    /// `{"name", "description", "parameters": {NAME: {...}}, "outcome": {...}}`.
    pub fn from_json(value: &serde_json::Value) -> TlResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| validation_error!("experiment description must be a JSON object"))?;
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| validation_error!("experiment: missing required property 'name'"))?;
        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let params = obj
            .get("parameters")
            .and_then(|v| v.as_object())
            .ok_or_else(|| validation_error!("experiment: 'parameters' must be an object"))?;
        let mut parameters = Vec::with_capacity(params.len());
        for (param_name, props) in params {
            let props = props
                .as_object()
                .ok_or_else(|| validation_error!("parameter '{}' must be an object", param_name))?;
            parameters.push(ParameterSpec::from_properties(param_name, props)?);
        }

        let outcome = obj
            .get("outcome")
            .and_then(|v| v.as_object())
            .ok_or_else(|| validation_error!("experiment: missing required property 'outcome'"))?;

        let spec = Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            outcome: OutcomeSpec::from_properties(outcome)?,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> TlResult<()> {
        if self.name.trim().is_empty() {
            return Err(validation_error!("experiment name must not be empty"));
        }
        if self.parameters.is_empty() {
            return Err(validation_error!(
                "experiment '{}' needs at least one parameter",
                self.name
            ));
        }
        self.outcome.validate()?;
        for (i, param) in self.parameters.iter().enumerate() {
            param.validate()?;
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(validation_error!("duplicate parameter name '{}'", param.name));
            }
            if param.name == self.outcome.name {
                return Err(validation_error!(
                    "parameter '{}' shadows the outcome name",
                    param.name
                ));
            }
        }
        Ok(())
    }
}
