//! Value types shared by every stage of the driver pipeline.
//!
//! Records fetched from the control plane are treated as immutable snapshots
//! for the duration of a reconciliation cycle; workers receive clones.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Canonical filename prefix of every installed driver executable.
pub const DRIVER_BINARY_PREFIX: &str = "docker-machine-driver";

/// Lifecycle state of a driver as declared by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    Requested,
    Activating,
    Active,
    Erroring,
    Error,
    Deactivating,
    Inactive,
    Removing,
    Removed,
    #[serde(other)]
    Unknown,
}

impl DriverState {
    /// States whose drivers must be installed and carry a published schema.
    pub fn is_wanted(self) -> bool {
        matches!(self, Self::Requested | Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Erroring => "erroring",
            Self::Error => "error",
            Self::Deactivating => "deactivating",
            Self::Inactive => "inactive",
            Self::Removing => "removing",
            Self::Removed => "removed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and lifecycle state of one provider plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    /// Control-plane id; `None` for built-ins synthesized from local config.
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub source_uri: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub builtin: bool,
    pub state: DriverState,
    #[serde(default)]
    pub schema_version: String,
}

impl DriverRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: DriverState) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            source_uri: String::new(),
            checksum: String::new(),
            builtin: false,
            state,
            schema_version: String::new(),
        }
    }

    /// Built-in driver known only from local configuration.
    pub fn synthesized_builtin(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            source_uri: String::new(),
            checksum: String::new(),
            builtin: true,
            state: DriverState::Active,
            schema_version: String::new(),
        }
    }

    pub fn with_source(mut self, uri: impl Into<String>, checksum: impl Into<String>) -> Self {
        self.source_uri = uri.into();
        self.checksum = checksum.into();
        self
    }

    pub fn binary_name(&self) -> String {
        binary_name(&self.name)
    }

    pub fn config_schema_name(&self) -> String {
        config_schema_name(&self.name)
    }

    /// Whether an install can be attempted at all.
    pub fn is_downloadable(&self) -> bool {
        !self.builtin && !self.source_uri.is_empty()
    }
}

pub fn binary_name(driver: &str) -> String {
    format!("{DRIVER_BINARY_PREFIX}-{driver}")
}

pub fn config_schema_name(driver: &str) -> String {
    format!("{driver}Config")
}

/// Rejects names that would escape the install directory or produce an
/// unusable binary name.
pub fn validate_driver_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DriverError::InvalidDriverName(name.to_string()))
    }
}

/// Field types understood by the control plane's schema format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Boolean,
    StringArray,
    Map,
    /// Reference to another schema, e.g. `digitaloceanConfig`.
    Reference(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::StringArray => "array[string]",
            Self::Map => "map[string]",
            Self::Reference(name) => name,
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "string" => Self::String,
            "boolean" => Self::Boolean,
            "array[string]" => Self::StringArray,
            "map[string]" => Self::Map,
            _ => Self::Reference(raw),
        })
    }
}

/// One configuration parameter exposed to end users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceField {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "create")]
    pub creatable: bool,
    #[serde(rename = "update")]
    pub updatable: bool,
}

impl ResourceField {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            description: String::new(),
            default: None,
            creatable: true,
            updatable: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn access(mut self, creatable: bool, updatable: bool) -> Self {
        self.creatable = creatable;
        self.updatable = updatable;
        self
    }
}

/// Serialized field map of a schema document. Keyed by field name, which
/// keeps names unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub resource_fields: BTreeMap<String, ResourceField>,
}

impl SchemaDefinition {
    pub fn field(&self, name: &str) -> Option<&ResourceField> {
        self.resource_fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.resource_fields.keys().map(String::as_str)
    }
}

/// A schema as stored by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    pub id: String,
    pub name: String,
    pub parent_name: String,
    pub roles: BTreeSet<String>,
    pub definition: SchemaDefinition,
    pub transitioning: bool,
    pub removed: bool,
}

/// A schema about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchema {
    pub name: String,
    pub parent_name: String,
    pub roles: BTreeSet<String>,
    pub definition: SchemaDefinition,
}

impl NewSchema {
    /// Two documents describe the same slot when name and role set agree.
    pub fn same_slot(&self, doc: &SchemaDocument) -> bool {
        doc.name == self.name && doc.roles == self.roles
    }
}

/// Semicolon-delimited list of driver names excluded from all work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    raw: String,
    names: BTreeSet<String>,
}

impl Blacklist {
    pub fn parse(raw: &str) -> Self {
        let names = raw
            .split(';')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw: raw.to_string(),
            names,
        }
    }

    pub fn contains(&self, driver: &str) -> bool {
        self.names.contains(driver)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Named actions on a driver record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverAction {
    Activate,
    Error { message: String },
}

impl DriverAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Error { .. } => "error",
        }
    }
}
