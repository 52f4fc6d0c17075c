//! The aggregate `machine` schema, one document per role profile.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::{config_schema_name, FieldType, NewSchema, ResourceField, SchemaDefinition};

pub const MACHINE_SCHEMA_NAME: &str = "machine";
pub const MACHINE_SCHEMA_PARENT: &str = "host";

/// Audience a published `machine` schema is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleProfile {
    Service,
    Project,
    Admin,
    ReadOnly,
}

impl RoleProfile {
    pub const ALL: [RoleProfile; 4] = [Self::Service, Self::Project, Self::Admin, Self::ReadOnly];

    /// Control-plane roles covered by this profile.
    pub fn roles(self) -> BTreeSet<String> {
        let roles: &[&str] = match self {
            Self::Service => &["service"],
            Self::Project => &["project", "owner", "member"],
            Self::Admin => &["admin", "user"],
            Self::ReadOnly => &["readonly"],
        };
        roles.iter().map(|r| r.to_string()).collect()
    }

    /// Union of every profile's roles; driver config schemas are visible to all.
    pub fn all_roles() -> BTreeSet<String> {
        Self::ALL.iter().flat_map(|profile| profile.roles()).collect()
    }

    fn can_create(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    fn sees_credentials(self) -> bool {
        matches!(self, Self::Service | Self::Admin)
    }
}

impl fmt::Display for RoleProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Service => "service",
            Self::Project => "project",
            Self::Admin => "admin",
            Self::ReadOnly => "readonly",
        };
        f.write_str(name)
    }
}

struct HostField {
    name: &'static str,
    field_type: FieldType,
    updatable: bool,
    credential: bool,
}

fn host_field(name: &'static str, field_type: FieldType, updatable: bool, credential: bool) -> HostField {
    HostField {
        name,
        field_type,
        updatable,
        credential,
    }
}

fn generic_host_fields() -> [HostField; 13] {
    [
        host_field("name", FieldType::String, false, false),
        host_field("description", FieldType::String, true, false),
        host_field("hostname", FieldType::String, false, false),
        host_field("labels", FieldType::Map, true, false),
        host_field("engineInstallUrl", FieldType::String, false, false),
        host_field("engineOpt", FieldType::Map, false, false),
        host_field("engineEnv", FieldType::Map, false, false),
        host_field("engineLabel", FieldType::Map, false, false),
        host_field("engineInsecureRegistry", FieldType::StringArray, false, false),
        host_field("engineRegistryMirror", FieldType::StringArray, false, false),
        host_field("engineStorageDriver", FieldType::String, false, false),
        host_field("authCertificateAuthority", FieldType::String, false, true),
        host_field("authKey", FieldType::String, false, true),
    ]
}

/// Builds the `machine` schema for `role`, with one `<driver>Config` field per
/// driver name.
pub fn machine_schema<I, S>(drivers: I, role: RoleProfile) -> NewSchema
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut definition = SchemaDefinition::default();

    for field in generic_host_fields() {
        if field.credential && !role.sees_credentials() {
            continue;
        }
        let creatable = role.can_create();
        let resource = ResourceField::new(field.field_type).access(creatable, creatable && field.updatable);
        definition.resource_fields.insert(field.name.to_string(), resource);
    }

    for driver in drivers {
        let config = config_schema_name(driver.as_ref());
        let resource = ResourceField::new(FieldType::Reference(config.clone())).access(role.can_create(), false);
        definition.resource_fields.insert(config, resource);
    }

    NewSchema {
        name: MACHINE_SCHEMA_NAME.to_string(),
        parent_name: MACHINE_SCHEMA_PARENT.to_string(),
        roles: role.roles(),
        definition,
    }
}
