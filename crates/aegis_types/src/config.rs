//! Tagged configuration values shared by plugin and connector schemas.

use crate::ids::ServerId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The declared type of a single configuration field.
///
/// Options for `Enum` fields live on the schema, not the value; the order of
/// the options list is preserved for UI rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldType {
    String,
    Int,
    Float,
    Bool,
    Enum,
    Secret,
    ServerRef,
    ConnectorRef,
}

/// A dynamically typed configuration value.
///
/// Plugin and connector configuration arrives as opaque maps from the
/// operator UI; each entry is one of these tagged variants so downstream
/// code never has to guess at JSON value shapes.
///
/// # Examples
///
/// ```rust
/// use aegis_types::ConfigValue;
///
/// let threshold = ConfigValue::Int(5);
/// assert_eq!(threshold.as_int(), Some(5));
/// assert_eq!(threshold.as_str(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A selection out of the schema's ordered options list
    Enum(String),
    /// Secret material; the Debug/Display impls never reveal it
    Secret(String),
    /// Reference to a managed server
    ServerRef(ServerId),
    /// Reference to a shared connector instance
    ConnectorRef(Uuid),
}

impl ConfigValue {
    /// Returns the string content for `String`, `Enum` and `Secret` variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) | ConfigValue::Enum(s) | ConfigValue::Secret(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float content for `Float` (and widened `Int`) values.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the boolean content, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the referenced server, if this is a `ServerRef`.
    pub fn as_server_ref(&self) -> Option<ServerId> {
        match self {
            ConfigValue::ServerRef(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the referenced connector, if this is a `ConnectorRef`.
    pub fn as_connector_ref(&self) -> Option<Uuid> {
        match self {
            ConfigValue::ConnectorRef(id) => Some(*id),
            _ => None,
        }
    }

    /// True when the value's runtime variant matches the declared field type.
    pub fn matches(&self, field_type: ConfigFieldType) -> bool {
        matches!(
            (self, field_type),
            (ConfigValue::String(_), ConfigFieldType::String)
                | (ConfigValue::Int(_), ConfigFieldType::Int)
                | (ConfigValue::Float(_), ConfigFieldType::Float)
                | (ConfigValue::Int(_), ConfigFieldType::Float)
                | (ConfigValue::Bool(_), ConfigFieldType::Bool)
                | (ConfigValue::Enum(_), ConfigFieldType::Enum)
                | (ConfigValue::Secret(_), ConfigFieldType::Secret)
                | (ConfigValue::ServerRef(_), ConfigFieldType::ServerRef)
                | (ConfigValue::ConnectorRef(_), ConfigFieldType::ConnectorRef)
        )
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::String(s) | ConfigValue::Enum(s) => write!(f, "{s}"),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Bool(v) => write!(f, "{v}"),
            ConfigValue::Secret(_) => write!(f, "<secret>"),
            ConfigValue::ServerRef(id) => write!(f, "{id}"),
            ConfigValue::ConnectorRef(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_widens_to_float() {
        assert_eq!(ConfigValue::Int(3).as_float(), Some(3.0));
        assert!(ConfigValue::Int(3).matches(ConfigFieldType::Float));
    }

    #[test]
    fn secret_display_is_masked() {
        let v = ConfigValue::Secret("hunter2".to_string());
        assert_eq!(v.to_string(), "<secret>");
    }

    #[test]
    fn tagged_serde_round_trip() {
        let v = ConfigValue::Enum("warn".to_string());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"enum","value":"warn"}"#);
        let back: ConfigValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
