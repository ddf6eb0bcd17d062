//! Parameter schemas and their prompt rendering.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::StepError;

/// JSON schema of `P`.
pub(crate) fn schema_of<P: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(P)).unwrap_or(Value::Null)
}

/// Top-level properties of `schema`, each without its `title`.
pub(crate) fn properties(schema: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            let mut prop = prop.clone();
            if let Some(obj) = prop.as_object_mut() {
                obj.remove("title");
            }
            out.insert(name.clone(), prop);
        }
    }
    out
}

/// `{description}: \n{name: {properties}}`
pub(crate) fn prompt_line(name: &str, description: &str, schema: &Value) -> String {
    let props = Value::Object(properties(schema));
    format!("{}: \n{{{}: {}}}", description, name, props)
}

/// Decode raw parameters, treating `null` as an empty object.
pub(crate) fn decode<P: DeserializeOwned>(action: &str, params: Value) -> Result<P, StepError> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(params).map_err(|e| StepError::Validation {
        action: action.to_string(),
        message: e.to_string(),
    })
}
