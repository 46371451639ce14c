//! Tool descriptors.
//!
//! A descriptor is the model-facing declaration of a tool: its name, what it
//! does, and the JSON-schema-typed parameters it accepts. Descriptors are
//! registered once at startup and never change afterwards.

use crate::error::ToolError;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Maximum tool name length accepted by chat-completion APIs.
const MAX_TOOL_NAME_LEN: usize = 64;

/// JSON-schema type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// A JSON string.
    String,
    /// A JSON integer.
    Integer,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl ParameterType {
    /// Returns true if `value` has this JSON type.
    #[must_use]
    pub fn matches(&self, value: &JsonValue) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Schema for a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// The JSON type.
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// What the parameter means, for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values, for string parameters.
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// Value used when the model omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

impl ParameterSchema {
    /// Creates a schema of the given type.
    #[must_use]
    pub fn new(param_type: ParameterType) -> Self {
        Self {
            param_type,
            description: None,
            allowed_values: Vec::new(),
            default: None,
        }
    }

    /// Creates a string schema.
    #[must_use]
    pub fn string() -> Self {
        Self::new(ParameterType::String)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restricts the parameter to a set of values.
    #[must_use]
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<JsonValue>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// The `parameters` object of a tool declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParameterSet {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    properties: BTreeMap<String, ParameterSchema>,
    #[serde(default)]
    required: Vec<String>,
}

/// Declaration of a tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Parameters by name.
    pub properties: BTreeMap<String, ParameterSchema>,
    /// Names of the parameters the model must supply, in declaration order.
    pub required: Vec<String>,
}

impl ToolDescriptor {
    /// Creates a descriptor with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Adds a parameter the model must supply.
    #[must_use]
    pub fn with_required_parameter(mut self, name: impl Into<String>, schema: ParameterSchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Adds a parameter the model may omit.
    #[must_use]
    pub fn with_optional_parameter(mut self, name: impl Into<String>, schema: ParameterSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Returns true if `name` is a required parameter.
    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Checks the descriptor is well-formed.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidDescriptor` if the name is empty, too long or
    /// uses characters outside `[A-Za-z0-9_-]`, if a required parameter is
    /// not declared, or if a non-string parameter lists allowed values.
    pub fn validate(&self) -> Result<(), Report<ToolError>> {
        let invalid = |reason: String| -> Report<ToolError> {
            ToolError::InvalidDescriptor {
                name: self.name.clone(),
                reason,
            }
            .into()
        };

        if self.name.is_empty() || self.name.len() > MAX_TOOL_NAME_LEN {
            return Err(invalid(format!(
                "name must be 1 to {MAX_TOOL_NAME_LEN} characters"
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("name may only contain [A-Za-z0-9_-]".to_string()));
        }
        if let Some(missing) = self.required.iter().find(|r| !self.properties.contains_key(*r)) {
            return Err(invalid(format!(
                "required parameter '{missing}' is not declared"
            )));
        }
        if let Some((param, _)) = self
            .properties
            .iter()
            .find(|(_, s)| !s.allowed_values.is_empty() && s.param_type != ParameterType::String)
        {
            return Err(invalid(format!(
                "parameter '{param}' lists allowed values but is not a string"
            )));
        }
        Ok(())
    }

    /// Checks parsed arguments against the declared parameters.
    ///
    /// Unknown arguments are tolerated; models occasionally add them.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidArguments` for a missing required argument,
    /// a value of the wrong JSON type, or a value outside the allowed set.
    pub fn check_arguments(
        &self,
        args: &serde_json::Map<String, JsonValue>,
    ) -> Result<(), Report<ToolError>> {
        let invalid = |reason: String| -> Report<ToolError> {
            ToolError::InvalidArguments {
                name: self.name.clone(),
                reason,
            }
            .into()
        };

        if let Some(missing) = self.required.iter().find(|r| !args.contains_key(*r)) {
            return Err(invalid(format!("missing required argument '{missing}'")));
        }
        for (key, value) in args {
            let Some(schema) = self.properties.get(key) else {
                continue;
            };
            if !schema.param_type.matches(value) {
                return Err(invalid(format!(
                    "argument '{key}' should be of type {:?}",
                    schema.param_type
                )));
            }
            if let Some(s) = value.as_str()
                && !schema.allowed_values.is_empty()
                && !schema.allowed_values.iter().any(|v| v == s)
            {
                return Err(invalid(format!(
                    "argument '{key}' must be one of {:?}, got '{s}'",
                    schema.allowed_values
                )));
            }
        }
        Ok(())
    }

    /// Returns `args` without the optional parameters the model set to `null`.
    ///
    /// Models often send `null` for a parameter they mean to leave out.
    /// Required parameters keep their `null` so the check still rejects it.
    #[must_use]
    pub fn drop_null_optionals(
        &self,
        args: &serde_json::Map<String, JsonValue>,
    ) -> serde_json::Map<String, JsonValue> {
        args.iter()
            .filter(|(key, value)| !value.is_null() || self.is_required(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Serializes the descriptor to the chat-completion tool format.
    #[must_use]
    pub fn to_wire(&self) -> JsonValue {
        let parameters = ParameterSet {
            kind: "object".to_string(),
            properties: self.properties.clone(),
            required: self.required.clone(),
        };
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": parameters,
            }
        })
    }

    /// Parses a descriptor from the chat-completion tool format.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidDescriptor` if the value is not a function
    /// declaration with an object parameter set.
    pub fn from_wire(value: &JsonValue) -> Result<Self, Report<ToolError>> {
        #[derive(Deserialize)]
        struct WireFunction {
            name: String,
            #[serde(default)]
            description: String,
            parameters: ParameterSet,
        }

        let name = value["function"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let invalid = |reason: String| -> Report<ToolError> {
            ToolError::InvalidDescriptor {
                name: name.clone(),
                reason,
            }
            .into()
        };

        if value["type"] != "function" {
            return Err(invalid("declaration type is not 'function'".to_string()));
        }
        let function: WireFunction = serde_json::from_value(value["function"].clone())
            .map_err(|e| invalid(e.to_string()))?;
        if function.parameters.kind != "object" {
            return Err(invalid("parameters must be of type 'object'".to_string()));
        }

        Ok(Self {
            name: function.name,
            description: function.description,
            properties: function.parameters.properties,
            required: function.parameters.required,
        })
    }
}
