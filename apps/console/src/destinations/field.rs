use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A form value. Booleans stay booleans so toggles like `use-ssl` survive a
/// round trip through the target URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Bool(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Bool(value) => *value,
            FieldValue::Text(text) => !text.is_empty(),
        }
    }

    /// Query string form; falsy values become the empty string.
    pub fn to_query_value(&self) -> String {
        match self {
            FieldValue::Bool(true) => "true".to_string(),
            FieldValue::Bool(false) => String::new(),
            FieldValue::Text(text) => text.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Structured destination as edited in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationFields {
    /// Catalog id: the UI-facing alias when the entry has one, else the backend key.
    #[serde(rename = "destinationType")]
    pub destination_type: String,
    #[serde(default)]
    pub custom: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub dynamic: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub advanced: BTreeMap<String, FieldValue>,
}

impl DestinationFields {
    pub fn new(destination_type: &str) -> Self {
        Self {
            destination_type: destination_type.to_string(),
            ..Self::default()
        }
    }

    pub fn with_custom(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.custom.insert(name.to_string(), value.into());
        self
    }

    pub fn with_dynamic(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.dynamic.insert(name.to_string(), value.into());
        self
    }

    pub fn with_advanced(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.advanced.insert(name.to_string(), value.into());
        self
    }

    /// Text of a custom field, empty when unset.
    pub fn custom_str(&self, name: &str) -> &str {
        self.custom
            .get(name)
            .and_then(FieldValue::as_str)
            .unwrap_or_default()
    }

    pub fn dynamic_str(&self, name: &str) -> &str {
        self.dynamic
            .get(name)
            .and_then(FieldValue::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Password,
    Boolean,
    Integer,
    Decimal,
    Enumeration,
    Flags,
    Path,
    Hostname,
    Size,
    Timespan,
    FileName,
    #[serde(other)]
    Unknown,
}

/// Declaration of one form field. Every property except the name is optional
/// so a static declaration can override only what it knows better than the
/// backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_hint: Option<String>,
}

impl FieldSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn kind(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = Some(true);
        self
    }

    pub fn order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn values(mut self, values: &[&str]) -> Self {
        self.valid_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: &str, hint: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self.format_hint = Some(hint.to_string());
        self
    }

    /// Name or any alias equals `name`.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|alias| alias == name)
    }

    /// True when the two declarations share a name or alias.
    pub fn overlaps(&self, other: &FieldSpec) -> bool {
        self.answers_to(&other.name) || other.aliases.iter().any(|alias| self.answers_to(alias))
    }

    pub fn is_boolean(&self) -> bool {
        self.field_type == Some(FieldType::Boolean)
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory.unwrap_or(false)
    }

    /// Shallow merge: properties set here win, the rest come from `base`.
    pub fn merged_over(&self, base: &FieldSpec) -> FieldSpec {
        FieldSpec {
            name: self.name.clone(),
            aliases: if self.aliases.is_empty() {
                base.aliases.clone()
            } else {
                self.aliases.clone()
            },
            field_type: self.field_type.or(base.field_type),
            label: self.label.clone().or_else(|| base.label.clone()),
            description: self.description.clone().or_else(|| base.description.clone()),
            default_value: self.default_value.clone().or_else(|| base.default_value.clone()),
            valid_values: self.valid_values.clone().or_else(|| base.valid_values.clone()),
            mandatory: self.mandatory.or(base.mandatory),
            order: self.order.or(base.order),
            min: self.min.or(base.min),
            max: self.max.or(base.max),
            pattern: self.pattern.clone().or_else(|| base.pattern.clone()),
            format_hint: self.format_hint.clone().or_else(|| base.format_hint.clone()),
        }
    }

    /// Typed value for a raw query string value.
    pub fn parse_value(&self, raw: &str) -> FieldValue {
        if self.is_boolean() {
            let truthy = matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes");
            FieldValue::Bool(truthy)
        } else {
            FieldValue::Text(raw.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_static_properties() {
        let backend = FieldSpec::new("auth-username")
            .kind(FieldType::String)
            .label("Username")
            .describe("The username used to connect")
            .alias("user");
        let declared = FieldSpec::new("auth-username").label("Access key ID").order(2);
        let merged = declared.merged_over(&backend);
        assert_eq!(merged.label.as_deref(), Some("Access key ID"));
        assert_eq!(merged.description.as_deref(), Some("The username used to connect"));
        assert_eq!(merged.aliases, vec!["user".to_string()]);
        assert_eq!(merged.order, Some(2));
        assert_eq!(merged.field_type, Some(FieldType::String));
    }

    #[test]
    fn boolean_parsing_and_query_form() {
        let spec = FieldSpec::new("use-ssl").kind(FieldType::Boolean);
        assert_eq!(spec.parse_value("true"), FieldValue::Bool(true));
        assert_eq!(spec.parse_value(""), FieldValue::Bool(false));
        assert_eq!(FieldValue::Bool(false).to_query_value(), "");
        assert_eq!(FieldValue::Bool(true).to_query_value(), "true");
    }

    #[test]
    fn fields_deserialize_from_ui_json() {
        let fields: DestinationFields = serde_json::from_str(
            r#"{"destinationType":"webdav","custom":{"server":"example.com"},"dynamic":{"use-ssl":true}}"#,
        )
        .unwrap();
        assert_eq!(fields.custom_str("server"), "example.com");
        assert_eq!(fields.dynamic.get("use-ssl"), Some(&FieldValue::Bool(true)));
        assert!(fields.advanced.is_empty());
    }

    #[test]
    fn unknown_field_types_are_tolerated() {
        let kind: FieldType = serde_json::from_str("\"Guid\"").unwrap();
        assert_eq!(kind, FieldType::Unknown);
    }
}
