//! Bootstrap configuration.
//!
//! A [`Configuration`] collects string properties and mapped classes, then
//! builds a [`SessionFactory`]. Properties may be set one by one or loaded
//! from a JSON object, flat (`{"schema.auto": "create"}`) or nested
//! (`{"schema": {"auto": "create"}}`).
//!
//! | Key | Values | Default |
//! |-----|--------|---------|
//! | `schema.auto` | `none`, `create` | `none` |
//! | `session.auto_begin` | `true`, `false` | `true` |
//! | `session.auto_flush` | `true`, `false` | `false` |

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_core::{ConversionError, EntityDescriptor, EntityDiscovery, Error, Model, Result};
use strata_schema::Registry;
use strata_session::{SchemaMode, SessionConfig, SessionFactory};

pub const SCHEMA_AUTO: &str = "schema.auto";
pub const SESSION_AUTO_BEGIN: &str = "session.auto_begin";
pub const SESSION_AUTO_FLUSH: &str = "session.auto_flush";

/// Typed view of the recognized properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schema: SchemaMode,
    pub session: SessionConfig,
}

impl Settings {
    /// Parse a property map. Unknown keys are ignored with a warning.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in properties {
            match key.as_str() {
                SCHEMA_AUTO => {
                    settings.schema = match value.trim().to_ascii_lowercase().as_str() {
                        "none" => SchemaMode::None,
                        "create" => SchemaMode::Create,
                        _ => return Err(invalid(key, value, "none or create")),
                    };
                }
                SESSION_AUTO_BEGIN => settings.session.auto_begin = parse_bool(key, value)?,
                SESSION_AUTO_FLUSH => settings.session.auto_flush = parse_bool(key, value)?,
                other => tracing::warn!(key = other, "Ignoring unknown configuration property"),
            }
        }
        Ok(settings)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "a boolean")),
    }
}

fn invalid(key: &str, value: &str, expected: &str) -> Error {
    Error::Conversion(
        ConversionError::new("property", "text")
            .with_detail(format!("{key} = '{value}': expected {expected}")),
    )
}

/// Properties plus the set of mapped classes.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    properties: BTreeMap<String, String>,
    descriptors: Vec<EntityDescriptor>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse properties from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::Custom(format!("invalid configuration JSON: {e}")))?;
        let serde_json::Value::Object(map) = value else {
            return Err(Error::Custom(
                "configuration JSON must be an object".to_string(),
            ));
        };
        let mut config = Self::new();
        flatten("", &map, &mut config.properties)?;
        Ok(config)
    }

    /// Read properties from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Custom(format!("cannot read configuration {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "Loading configuration");
        Self::from_json(&text)
    }

    pub fn set_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Register a mapped type. Ancestors are registered with it.
    pub fn register<M: Model>(self) -> Self {
        self.register_descriptor(M::descriptor())
    }

    pub fn register_descriptor(mut self, descriptor: EntityDescriptor) -> Self {
        tracing::debug!(entity = descriptor.name, "Registering entity");
        self.descriptors.push(descriptor);
        self
    }

    /// Register every class a discovery source yields.
    pub fn discover(mut self, source: &(impl EntityDiscovery + ?Sized)) -> Self {
        let found = source.discover();
        tracing::debug!(count = found.len(), "Discovered entities");
        self.descriptors.extend(found);
        self
    }

    pub fn descriptors(&self) -> &[EntityDescriptor] {
        &self.descriptors
    }

    pub fn settings(&self) -> Result<Settings> {
        Settings::from_properties(&self.properties)
    }

    /// Validate the mapping and build the factory.
    ///
    /// Fails with a mapping error when the declared classes are inconsistent;
    /// no factory is produced in that case.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn build_session_factory(&self) -> Result<SessionFactory> {
        let settings = self.settings()?;
        let registry = Registry::build(self.descriptors.clone())?;
        Ok(SessionFactory::new(registry, settings.session, settings.schema))
    }
}

fn flatten(
    prefix: &str,
    map: &serde_json::Map<String, serde_json::Value>,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    for (key, value) in map {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            serde_json::Value::Object(nested) => flatten(&key, nested, out)?,
            serde_json::Value::String(s) => {
                out.insert(key, s.clone());
            }
            serde_json::Value::Bool(b) => {
                out.insert(key, b.to_string());
            }
            serde_json::Value::Number(n) => {
                out.insert(key, n.to_string());
            }
            serde_json::Value::Null | serde_json::Value::Array(_) => {
                return Err(Error::Custom(format!(
                    "configuration property '{key}' must be a scalar"
                )));
            }
        }
    }
    Ok(())
}
