//! Plugin flag descriptors to schema fields.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::error::{DriverError, Result};
use crate::model::{FieldType, ResourceField, SchemaDefinition};
use crate::plugin::CreateFlag;

/// Fields dropped from a driver's config schema after translation, usually
/// local key-file paths that make no sense outside the agent's host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldOverrides {
    hidden: BTreeMap<String, BTreeSet<String>>,
}

impl FieldOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides shipped with the agent.
    pub fn builtin() -> Self {
        Self::new()
            .hide("amazonec2", ["sshKeypath"])
            .hide("digitalocean", ["sshKeyPath"])
            .hide("exoscale", ["sshKey"])
            .hide("openstack", ["privateKeyFile"])
            .hide("otc", ["privateKeyFile"])
            .hide("packet", ["sshKeyPath"])
            .hide("vmwarevsphere", ["cloudinit"])
    }

    pub fn hide<I, S>(mut self, driver: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden
            .entry(driver.to_string())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds entries from configuration on top of the current table.
    pub fn merge(mut self, extra: &BTreeMap<String, Vec<String>>) -> Self {
        for (driver, fields) in extra {
            self = self.hide(driver, fields.iter().cloned());
        }
        self
    }

    pub fn is_hidden(&self, driver: &str, field: &str) -> bool {
        self.hidden
            .get(driver)
            .is_some_and(|fields| fields.contains(field))
    }
}

/// `<driver>-access-token` becomes `accessToken`.
pub fn flag_field_name(driver: &str, flag: &str) -> Result<String> {
    let rest = flag
        .strip_prefix(driver)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|rest| rest.split('-').any(|word| !word.is_empty()))
        .ok_or_else(|| DriverError::MalformedFlagName {
            driver: driver.to_string(),
            flag: flag.to_string(),
        })?;
    Ok(camel_case(rest))
}

fn camel_case(dashed: &str) -> String {
    let mut out = String::with_capacity(dashed.len());
    for (i, word) in dashed.split('-').filter(|w| !w.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(word);
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

fn flag_to_field(flag: &CreateFlag) -> ResourceField {
    match flag {
        CreateFlag::String { usage, default, .. } => {
            let field = ResourceField::new(FieldType::String).description(usage.as_str());
            match default.as_deref() {
                Some(value) if !value.is_empty() => field.default_value(value),
                _ => field,
            }
        }
        // Rendered as a string so the field can be left empty.
        CreateFlag::Int { usage, default, .. } => {
            let field = ResourceField::new(FieldType::String).description(usage.as_str());
            match default {
                Some(value) => field.default_value(value.to_string()),
                None => field,
            }
        }
        CreateFlag::Bool { usage, .. } => ResourceField::new(FieldType::Boolean).description(usage.as_str()),
        CreateFlag::StringList { usage, .. } => {
            ResourceField::new(FieldType::StringArray).description(usage.as_str())
        }
    }
}

/// Builds the field map of `<driver>Config` from the plugin's flags.
///
/// Any malformed flag name fails the whole driver.
pub fn translate_flags(driver: &str, flags: &[CreateFlag], overrides: &FieldOverrides) -> Result<SchemaDefinition> {
    let mut definition = SchemaDefinition::default();

    for flag in flags {
        let name = flag_field_name(driver, flag.name())?;
        if overrides.is_hidden(driver, &name) {
            trace!(driver = %driver, field = %name, "Hiding overridden field");
            continue;
        }
        if definition.resource_fields.insert(name.clone(), flag_to_field(flag)).is_some() {
            debug!(driver = %driver, field = %name, "Duplicate field after translation, keeping last");
        }
    }

    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_flag(name: &str, default: Option<&str>) -> CreateFlag {
        CreateFlag::String {
            name: name.into(),
            usage: format!("usage of {name}"),
            default: default.map(Into::into),
        }
    }

    #[test]
    fn strips_driver_prefix_and_camel_cases() {
        assert_eq!(
            flag_field_name("digitalocean", "digitalocean-access-token").unwrap(),
            "accessToken"
        );
        assert_eq!(flag_field_name("amazonec2", "amazonec2-ssh-keypath").unwrap(), "sshKeypath");
        assert_eq!(flag_field_name("foo", "foo-region").unwrap(), "region");
    }

    #[test]
    fn flags_without_driver_prefix_are_malformed() {
        for flag in ["access-token", "digitalocean", "digitalocean-", "digitaloceanaccess-token", "x-digitalocean-a"] {
            let err = flag_field_name("digitalocean", flag).unwrap_err();
            assert!(
                matches!(err, DriverError::MalformedFlagName { flag: ref f, .. } if f == flag),
                "{flag} should be malformed"
            );
        }
    }

    #[test]
    fn types_and_defaults_map_exactly() {
        let flags = vec![
            string_flag("digitalocean-image", Some("ubuntu-16-04-x64")),
            string_flag("digitalocean-userdata", Some("")),
            CreateFlag::Int {
                name: "digitalocean-ssh-port".into(),
                usage: "SSH port".into(),
                default: Some(22),
            },
            CreateFlag::Bool {
                name: "digitalocean-ipv6".into(),
                usage: "enable ipv6".into(),
            },
            CreateFlag::StringList {
                name: "digitalocean-tags".into(),
                usage: "tags".into(),
                default: vec!["a".into()],
            },
        ];

        let definition = translate_flags("digitalocean", &flags, &FieldOverrides::new()).unwrap();

        let image = definition.field("image").unwrap();
        assert_eq!(image.field_type, FieldType::String);
        assert_eq!(image.default.as_deref(), Some("ubuntu-16-04-x64"));
        assert_eq!(image.description, "usage of digitalocean-image");

        assert_eq!(definition.field("userdata").unwrap().default, None);

        let port = definition.field("sshPort").unwrap();
        assert_eq!(port.field_type, FieldType::String);
        assert_eq!(port.default.as_deref(), Some("22"));

        let ipv6 = definition.field("ipv6").unwrap();
        assert_eq!(ipv6.field_type, FieldType::Boolean);
        assert_eq!(ipv6.default, None);

        let tags = definition.field("tags").unwrap();
        assert_eq!(tags.field_type, FieldType::StringArray);
        assert_eq!(tags.default, None);
    }

    #[test]
    fn overridden_fields_are_removed() {
        let flags = vec![
            string_flag("digitalocean-ssh-key-path", None),
            string_flag("digitalocean-region", Some("nyc3")),
        ];
        let overrides = FieldOverrides::builtin();

        let definition = translate_flags("digitalocean", &flags, &overrides).unwrap();
        assert_eq!(definition.field_names().collect::<Vec<_>>(), vec!["region"]);
    }

    #[test]
    fn configured_overrides_extend_builtin_table() {
        let mut extra = BTreeMap::new();
        extra.insert("digitalocean".to_string(), vec!["region".to_string()]);
        let overrides = FieldOverrides::builtin().merge(&extra);

        assert!(overrides.is_hidden("digitalocean", "sshKeyPath"));
        assert!(overrides.is_hidden("digitalocean", "region"));
        assert!(!overrides.is_hidden("amazonec2", "region"));
    }

    #[test]
    fn one_malformed_flag_fails_the_driver() {
        let flags = vec![string_flag("foo-region", None), string_flag("bar-zone", None)];
        assert!(matches!(
            translate_flags("foo", &flags, &FieldOverrides::new()),
            Err(DriverError::MalformedFlagName { .. })
        ));
    }
}
