use crate::destinations::catalog::DestinationType;
use crate::destinations::field::{DestinationFields, FieldSpec, FieldType, FieldValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Fields without an explicit order sort after every ordered one.
pub const ORDER_BASE: u32 = 1000;

/// Backend description as served by the backup server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackendModule {
    pub key: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<CommandLineOption>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandLineOption {
    pub name: String,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(rename = "Type", default)]
    pub option_type: Option<FieldType>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub long_description: Option<String>,
    #[serde(default)]
    pub valid_values: Option<Vec<String>>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
}

impl CommandLineOption {
    pub fn to_field(&self) -> FieldSpec {
        FieldSpec {
            name: self.name.clone(),
            aliases: self.aliases.clone().unwrap_or_default(),
            field_type: self.option_type,
            label: self.short_description.clone(),
            description: self.long_description.clone(),
            default_value: self.default_value.clone().filter(|v| !v.is_empty()),
            valid_values: self.valid_values.clone().filter(|v| !v.is_empty()),
            ..FieldSpec::default()
        }
    }
}

/// Rendered form description for one destination type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestinationSchema {
    pub key: String,
    pub custom: Vec<FieldSpec>,
    pub dynamic: Vec<FieldSpec>,
    pub advanced: Vec<FieldSpec>,
}

/// Merges the static declarations of `entry` with the options the backend
/// reports. Declared properties win over reported ones; deprecated and ignored
/// options are dropped; a declared field with no reported counterpart is still
/// rendered from its own metadata.
pub fn describe(entry: &DestinationType, backend: Option<&BackendModule>) -> DestinationSchema {
    let options = backend.map(|b| b.options.as_slice()).unwrap_or_default();
    let mut dynamic: Vec<FieldSpec> = Vec::new();
    let mut advanced: Vec<FieldSpec> = Vec::new();
    let mut seen_dynamic = vec![false; entry.dynamic.len()];
    let mut seen_advanced = vec![false; entry.advanced.len()];

    for (index, option) in options.iter().enumerate() {
        if option.deprecated {
            continue;
        }
        let reported = option.to_field();
        if entry.is_ignored(&reported) || entry.custom.iter().any(|c| c.overlaps(&reported)) {
            continue;
        }
        let catalog_order = ORDER_BASE + index as u32;
        if let Some(pos) = entry.dynamic.iter().position(|d| d.overlaps(&reported)) {
            if seen_dynamic[pos] {
                debug!("destinations: option {} repeats field {}", reported.name, entry.dynamic[pos].name);
                continue;
            }
            seen_dynamic[pos] = true;
            dynamic.push(ordered(entry.dynamic[pos].merged_over(&reported), catalog_order));
        } else if let Some(pos) = entry.advanced.iter().position(|a| a.overlaps(&reported)) {
            if seen_advanced[pos] {
                debug!("destinations: option {} repeats field {}", reported.name, entry.advanced[pos].name);
                continue;
            }
            seen_advanced[pos] = true;
            advanced.push(ordered(entry.advanced[pos].merged_over(&reported), catalog_order));
        } else {
            advanced.push(ordered(reported, catalog_order));
        }
    }

    let tail = ORDER_BASE + options.len() as u32;
    for (pos, declared) in entry.dynamic.iter().enumerate() {
        if !seen_dynamic[pos] {
            debug!("destinations: field {} not reported by backend {}", declared.name, entry.key);
            dynamic.push(ordered(declared.clone(), tail + pos as u32));
        }
    }
    for (pos, declared) in entry.advanced.iter().enumerate() {
        if !seen_advanced[pos] {
            advanced.push(ordered(declared.clone(), tail + (entry.dynamic.len() + pos) as u32));
        }
    }

    // Stable: equal orders keep insertion order.
    dynamic.sort_by_key(|field| field.order);
    advanced.sort_by_key(|field| field.order);

    DestinationSchema {
        key: entry.id().to_string(),
        custom: entry.custom.clone(),
        dynamic,
        advanced,
    }
}

fn ordered(mut field: FieldSpec, fallback: u32) -> FieldSpec {
    field.order = Some(field.order.unwrap_or(fallback));
    field
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldGroup {
    Custom,
    Dynamic,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub group: FieldGroup,
    pub field: String,
    pub message: String,
}

/// Checks entered values against the schema. Empty list means the fields can
/// be encoded and submitted.
pub fn validate(schema: &DestinationSchema, fields: &DestinationFields) -> Vec<FieldIssue> {
    let mut issues = Vec::new();
    let groups = [
        (FieldGroup::Custom, &schema.custom, &fields.custom),
        (FieldGroup::Dynamic, &schema.dynamic, &fields.dynamic),
        (FieldGroup::Advanced, &schema.advanced, &fields.advanced),
    ];
    for (group, specs, values) in groups {
        for spec in specs.iter() {
            if let Some(message) = check(spec, lookup(spec, values)) {
                issues.push(FieldIssue {
                    group,
                    field: spec.name.clone(),
                    message,
                });
            }
        }
    }
    issues
}

fn lookup<'a>(spec: &FieldSpec, values: &'a BTreeMap<String, FieldValue>) -> Option<&'a FieldValue> {
    values.get(&spec.name).or_else(|| {
        spec.aliases
            .iter()
            .find_map(|alias| values.get(alias))
    })
}

fn check(spec: &FieldSpec, value: Option<&FieldValue>) -> Option<String> {
    let text = match value {
        None => None,
        Some(FieldValue::Bool(_)) => {
            return match spec.field_type {
                Some(FieldType::Boolean) | None => None,
                _ => Some("expects a text value".to_string()),
            };
        }
        Some(FieldValue::Text(text)) => Some(text.trim()).filter(|t| !t.is_empty()),
    };
    let Some(text) = text else {
        return spec.is_mandatory().then(|| "is required".to_string());
    };

    match spec.field_type {
        Some(FieldType::Integer) => match text.parse::<i64>() {
            Ok(number) => {
                if spec.min.map(|min| number < min).unwrap_or(false)
                    || spec.max.map(|max| number > max).unwrap_or(false)
                {
                    return Some(format!(
                        "must be between {} and {}",
                        spec.min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".into()),
                        spec.max.map(|m| m.to_string()).unwrap_or_else(|| "inf".into())
                    ));
                }
            }
            Err(_) => return Some("must be a whole number".to_string()),
        },
        Some(FieldType::Decimal) => {
            if text.parse::<f64>().is_err() {
                return Some("must be a number".to_string());
            }
        }
        Some(FieldType::Boolean) => {
            if !matches!(text.to_ascii_lowercase().as_str(), "true" | "false" | "1" | "0" | "on" | "off") {
                return Some("must be true or false".to_string());
            }
        }
        Some(FieldType::Enumeration) => {
            if let Some(values) = &spec.valid_values {
                if !values.iter().any(|v| v.eq_ignore_ascii_case(text)) {
                    return Some(format!("must be one of: {}", values.join(", ")));
                }
            }
        }
        _ => {}
    }

    if let Some(pattern) = &spec.pattern {
        match Regex::new(&format!("^(?:{})$", pattern)) {
            Ok(re) if !re.is_match(text) => {
                let hint = spec.format_hint.as_deref().unwrap_or(pattern);
                return Some(format!("does not match the expected format ({})", hint));
            }
            Ok(_) => {}
            Err(err) => debug!("destinations: ignoring invalid pattern for {} err={}", spec.name, err),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destinations::catalog;

    fn option(name: &str) -> CommandLineOption {
        CommandLineOption {
            name: name.to_string(),
            short_description: Some(format!("{} (backend)", name)),
            long_description: Some(format!("Long help for {}", name)),
            option_type: Some(FieldType::String),
            ..CommandLineOption::default()
        }
    }

    fn backend(options: Vec<CommandLineOption>) -> BackendModule {
        BackendModule {
            key: "s3".into(),
            options,
            ..BackendModule::default()
        }
    }

    #[test]
    fn options_are_partitioned_and_merged() {
        let entry = catalog::find("s3").unwrap();
        let module = backend(vec![
            option("s3-unknown-tuning"),
            option("auth-username"),
            CommandLineOption {
                deprecated: true,
                ..option("s3-old-flag")
            },
            option("s3-server-name"),
        ]);
        let schema = describe(entry, Some(&module));

        let username = schema.dynamic.iter().find(|f| f.name == "auth-username").unwrap();
        assert_eq!(username.label.as_deref(), Some("Access key ID"));
        assert_eq!(username.description.as_deref(), Some("Long help for auth-username"));

        assert!(schema.advanced.iter().any(|f| f.name == "s3-unknown-tuning"));
        assert!(schema.advanced.iter().chain(&schema.dynamic).all(|f| f.name != "s3-old-flag"));
        assert_eq!(schema.custom.len(), 2);
    }

    #[test]
    fn options_sharing_a_declared_field_appear_once() {
        let entry = catalog::find("s3").unwrap();
        let module = backend(vec![
            option("auth-username"),
            CommandLineOption {
                aliases: Some(vec!["auth-username".into()]),
                ..option("s3-access-key")
            },
        ]);
        let schema = describe(entry, Some(&module));
        let usernames = schema.dynamic.iter().filter(|f| f.answers_to("auth-username")).count();
        assert_eq!(usernames, 1);
        assert!(schema.advanced.iter().all(|f| f.name != "s3-access-key"));
    }

    #[test]
    fn declared_fields_without_backend_option_are_kept() {
        let entry = catalog::find("s3").unwrap();
        let schema = describe(entry, None);
        let names: Vec<&str> = schema.dynamic.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names[0], "s3-server-name");
        assert_eq!(names[1], "auth-username");
        assert_eq!(names[2], "auth-password");
        assert!(names.contains(&"use-ssl"));
        assert_eq!(
            schema.dynamic.iter().find(|f| f.name == "auth-password").unwrap().field_type,
            Some(FieldType::Password)
        );
    }

    #[test]
    fn unordered_fields_follow_backend_order() {
        let entry = catalog::find("s3").unwrap();
        let module = backend(vec![option("s3-storage-class"), option("s3-location-constraint")]);
        let schema = describe(entry, Some(&module));
        let names: Vec<&str> = schema.dynamic.iter().map(|f| f.name.as_str()).collect();
        let class = names.iter().position(|n| *n == "s3-storage-class").unwrap();
        let region = names.iter().position(|n| *n == "s3-location-constraint").unwrap();
        assert!(class < region);
        assert!(names.iter().position(|n| *n == "auth-password").unwrap() < class);
    }

    #[test]
    fn ignored_and_positional_options_are_hidden() {
        let entry = catalog::find("b2").unwrap();
        let module = backend(vec![option("auth-password"), option("bucket"), option("b2-page-size")]);
        let schema = describe(entry, Some(&module));
        let all: Vec<&str> = schema
            .dynamic
            .iter()
            .chain(&schema.advanced)
            .map(|f| f.name.as_str())
            .collect();
        assert!(!all.contains(&"auth-password"));
        assert!(!all.contains(&"bucket"));
        assert!(all.contains(&"b2-page-size"));
    }

    #[test]
    fn backend_payload_deserializes() {
        let module: BackendModule = serde_json::from_str(
            r#"{"Key":"ssh","DisplayName":"SFTP","Description":"","Options":[
                {"Name":"ssh-fingerprint","Aliases":null,"Type":"String","ShortDescription":"Fingerprint",
                 "LongDescription":"","ValidValues":null,"DefaultValue":"","Deprecated":false}]}"#,
        )
        .unwrap();
        assert_eq!(module.options.len(), 1);
        assert_eq!(module.options[0].to_field().default_value, None);
    }

    #[test]
    fn validation_reports_each_problem() {
        let entry = catalog::find("ssh").unwrap();
        let schema = describe(entry, None);
        let fields = DestinationFields::new("ssh").with_custom("port", "99999");
        let issues = validate(&schema, &fields);
        assert!(issues
            .iter()
            .any(|i| i.field == "server" && i.group == FieldGroup::Custom && i.message == "is required"));
        assert!(issues.iter().any(|i| i.field == "port"));

        let good = DestinationFields::new("ssh")
            .with_custom("server", "host")
            .with_custom("port", "22");
        assert!(validate(&schema, &good).is_empty());
    }

    #[test]
    fn enumeration_and_pattern_checks() {
        let spec = FieldSpec::new("mode")
            .kind(FieldType::Enumeration)
            .values(&["None", "Auto"]);
        assert!(check(&spec, Some(&FieldValue::from("auto"))).is_none());
        assert!(check(&spec, Some(&FieldValue::from("Sometimes"))).is_some());

        let pattern = FieldSpec::new("region").pattern("[a-z]{2}-[a-z]+-\\d", "eu-west-1");
        assert!(check(&pattern, Some(&FieldValue::from("eu-west-1"))).is_none());
        let message = check(&pattern, Some(&FieldValue::from("Europe"))).unwrap();
        assert!(message.contains("eu-west-1"));
    }
}
