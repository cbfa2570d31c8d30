use crate::filters::rule::strip_sign;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Server-provided named exclusion sets, referenced from rule lists as `{Name}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterGroupCatalog {
    #[serde(rename = "FilterGroups", default)]
    groups: HashMap<String, Vec<String>>,
}

impl FilterGroupCatalog {
    pub fn new(groups: HashMap<String, Vec<String>>) -> Self {
        Self { groups }
    }

    /// Exact name first, then a case-insensitive match.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        if let Some(rules) = self.groups.get(name) {
            return Some(rules.as_slice());
        }
        self.groups
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, rules)| rules.as_slice())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// `{Name}` / `-{Name}` → `Name`.
pub fn group_name(token: &str) -> Option<&str> {
    let body = strip_sign(token);
    let name = body.strip_prefix('{')?.strip_suffix('}')?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Replaces every known `{Name}` token by the group's rules, each as an
/// exclusion, at the token's position. Unknown or empty groups stay as inert
/// literal tokens. The input list is left untouched.
pub fn expand(rules: &[String], catalog: &FilterGroupCatalog) -> Vec<String> {
    let mut expanded = Vec::with_capacity(rules.len());
    for token in rules {
        let group = group_name(token)
            .and_then(|name| catalog.get(name))
            .filter(|bodies| !bodies.is_empty());
        match group {
            Some(bodies) => {
                expanded.extend(bodies.iter().map(|body| format!("-{}", strip_sign(body))));
            }
            None => expanded.push(token.clone()),
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> FilterGroupCatalog {
        let mut groups = HashMap::new();
        groups.insert(
            "TemporaryFiles".to_string(),
            vec!["*.tmp".to_string(), "-*/Temp/".to_string()],
        );
        groups.insert("Empty".to_string(), Vec::new());
        FilterGroupCatalog::new(groups)
    }

    #[test]
    fn splices_group_in_place() {
        let rules = vec![
            "/home/".to_string(),
            "-{TemporaryFiles}".to_string(),
            "+/home/keep/".to_string(),
        ];
        let expanded = expand(&rules, &catalog());
        assert_eq!(
            expanded,
            vec!["/home/", "-*.tmp", "-*/Temp/", "+/home/keep/"]
        );
        assert_eq!(rules.len(), 3);
    }

    #[test]
    fn unsigned_reference_and_case_insensitive_lookup() {
        let expanded = expand(&["{temporaryfiles}".to_string()], &catalog());
        assert_eq!(expanded, vec!["-*.tmp", "-*/Temp/"]);
    }

    #[test]
    fn unknown_and_empty_groups_stay_literal() {
        let rules = vec!["-{Nope}".to_string(), "{Empty}".to_string(), "-{}".to_string()];
        assert_eq!(expand(&rules, &catalog()), rules);
    }

    #[test]
    fn catalog_deserializes_server_payload() {
        let catalog: FilterGroupCatalog =
            serde_json::from_str(r#"{"FilterGroups":{"CacheFiles":["*/cache/"]}}"#).unwrap();
        assert_eq!(catalog.get("CacheFiles").unwrap().to_vec(), vec!["*/cache/".to_string()]);
        assert_eq!(catalog.names(), vec!["CacheFiles"]);
    }
}
