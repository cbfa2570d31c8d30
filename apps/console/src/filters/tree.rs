//! Inclusion state for a lazily materialized file tree.
//!
//! A pass takes a consistent snapshot of the listed nodes and the rule list,
//! expands filter groups on a copy of the rules, and rebuilds the whole tree.
//! Nothing from a previous pass is reused.

use crate::filters::groups::{expand, FilterGroupCatalog};
use crate::filters::rule::{strip_sign, NodeKind, PathRule, RuleMatcher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A node as returned by the file listing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub id: String,
    pub cls: NodeKind,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, rename = "resolvedpath", skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
}

impl FileTreeNode {
    pub fn folder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            cls: NodeKind::Folder,
            hidden: false,
            resolved_path: None,
        }
    }

    pub fn file(id: &str) -> Self {
        Self {
            id: id.to_string(),
            cls: NodeKind::File,
            hidden: false,
            resolved_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalState {
    ExcludedByParent,
    Excluded,
    None,
    Included,
    IncludedByParent,
}

impl EvalState {
    pub fn is_excluded(self) -> bool {
        matches!(self, EvalState::Excluded | EvalState::ExcludedByParent)
    }

    pub fn is_included(self) -> bool {
        matches!(self, EvalState::Included | EvalState::IncludedByParent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Single,
    Multi,
}

/// A rule list prepared for one evaluation pass.
pub struct RuleSet {
    selections: Vec<String>,
    filters: Vec<(PathRule, Option<RuleMatcher>)>,
    bodies: Vec<String>,
}

impl RuleSet {
    pub fn new(rules: &[String], groups: &FilterGroupCatalog) -> Self {
        let expanded = expand(rules, groups);
        let mut selections = Vec::new();
        let mut filters = Vec::new();
        let mut bodies = Vec::with_capacity(expanded.len());
        for token in &expanded {
            let rule = PathRule::parse(token);
            bodies.push(rule.body.clone());
            if rule.is_filter() {
                let matcher = match RuleMatcher::compile(&rule.body) {
                    Ok(matcher) => Some(matcher),
                    Err(err) => {
                        debug!("tree: rule does not compile, treating as non-matching error={}", err);
                        None
                    }
                };
                filters.push((rule, matcher));
            } else {
                selections.push(rule.body);
            }
        }
        Self {
            selections,
            filters,
            bodies,
        }
    }

    /// Verdict for one node given its parent's verdict.
    pub fn evaluate_node(
        &self,
        id: &str,
        kind: NodeKind,
        resolved_path: Option<&str>,
        parent: EvalState,
    ) -> EvalState {
        if parent.is_excluded() {
            return EvalState::ExcludedByParent;
        }

        let mut state = EvalState::None;
        let selected = self.selections.iter().any(|path| {
            !path.is_empty()
                && (id.starts_with(path.as_str())
                    || resolved_path.is_some_and(|resolved| resolved.starts_with(path.as_str())))
        });
        if selected {
            state = EvalState::Included;
        }

        let first_match = self.filters.iter().find(|(_, matcher)| {
            matcher
                .as_ref()
                .is_some_and(|matcher| matcher.is_match(id, kind))
        });
        if let Some((rule, _)) = first_match {
            state = if rule.includes() {
                EvalState::Included
            } else {
                EvalState::Excluded
            };
        }

        if state == EvalState::None && parent.is_included() {
            state = EvalState::IncludedByParent;
        }
        state
    }

    /// Some rule points strictly below this node: a rule body extends `id`,
    /// not the other way round.
    pub fn is_indeterminate(&self, id: &str) -> bool {
        self.bodies
            .iter()
            .any(|body| body.len() > id.len() && body.starts_with(id))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub cls: NodeKind,
    pub hidden: bool,
    #[serde(rename = "resolvedpath", skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    pub state: EvalState,
    pub is_indeterminate: bool,
    /// Inserted as a missing ancestor rather than listed by the server.
    pub synthetic: bool,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    kind: NodeKind,
    state: EvalState,
    parent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTree {
    pub root: TreeNode,
    #[serde(skip)]
    index: BTreeMap<String, IndexEntry>,
}

impl FileTree {
    pub fn state_of(&self, id: &str) -> Option<EvalState> {
        self.index.get(id).map(|entry| entry.state)
    }

    pub fn kind_of(&self, id: &str) -> Option<NodeKind> {
        self.index.get(id).map(|entry| entry.kind)
    }

    /// Verdict of the node's parent; the synthetic root counts as `None`.
    pub fn parent_state(&self, id: &str) -> EvalState {
        self.index
            .get(id)
            .and_then(|entry| entry.parent.as_deref())
            .and_then(|parent| self.state_of(parent))
            .unwrap_or(EvalState::None)
    }

    /// Every evaluated node in path order, including ancestors above `root_path`.
    pub fn states(&self) -> Vec<(String, EvalState)> {
        self.index
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state))
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        fn walk<'a>(node: &'a TreeNode, id: &str) -> Option<&'a TreeNode> {
            if node.id == id {
                return Some(node);
            }
            node.children.iter().find_map(|child| walk(child, id))
        }
        walk(&self.root, id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

struct Entry {
    kind: NodeKind,
    hidden: bool,
    resolved_path: Option<String>,
    state: EvalState,
    indeterminate: bool,
    synthetic: bool,
    parent: Option<String>,
    children: Vec<String>,
}

struct TreeBuilder<'a> {
    rules: &'a RuleSet,
    cache: HashMap<String, Entry>,
    top: Vec<String>,
}

impl<'a> TreeBuilder<'a> {
    fn new(rules: &'a RuleSet) -> Self {
        Self {
            rules,
            cache: HashMap::new(),
            top: Vec::new(),
        }
    }

    fn insert(&mut self, node: &FileTreeNode, synthetic: bool) {
        let chain = components(&node.id);
        let last = chain.len().saturating_sub(1);
        let mut parent: Option<String> = None;
        for (i, path) in chain.into_iter().enumerate() {
            let is_leaf = i == last;
            if let Some(entry) = self.cache.get_mut(&path) {
                // Already evaluated this pass; only fill in listing attributes.
                if is_leaf && !synthetic && entry.synthetic {
                    entry.synthetic = false;
                    entry.hidden = node.hidden;
                    entry.resolved_path = node.resolved_path.clone();
                }
            } else {
                let kind = if is_leaf { node.cls } else { NodeKind::Folder };
                let resolved = if is_leaf { node.resolved_path.as_deref() } else { None };
                let parent_state = parent
                    .as_ref()
                    .and_then(|p| self.cache.get(p))
                    .map(|entry| entry.state)
                    .unwrap_or(EvalState::None);
                let state = self.rules.evaluate_node(&path, kind, resolved, parent_state);
                let entry = Entry {
                    kind,
                    hidden: is_leaf && node.hidden,
                    resolved_path: resolved.map(str::to_string),
                    state,
                    indeterminate: self.rules.is_indeterminate(&path),
                    synthetic: synthetic || !is_leaf,
                    parent: parent.clone(),
                    children: Vec::new(),
                };
                self.cache.insert(path.clone(), entry);
                match parent.as_ref().and_then(|p| self.cache.get_mut(p)) {
                    Some(parent_entry) => parent_entry.children.push(path.clone()),
                    None => self.top.push(path.clone()),
                }
            }
            parent = Some(path);
        }
    }

    fn finish(self, root_path: Option<&str>, accept: Option<&RuleMatcher>) -> FileTree {
        let top_ids = match root_path {
            Some(root) if self.cache.contains_key(root) => vec![root.to_string()],
            Some(_) => Vec::new(),
            None => self.top.clone(),
        };
        let children = self.build_children(&top_ids, accept);
        let index = self
            .cache
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    IndexEntry {
                        kind: entry.kind,
                        state: entry.state,
                        parent: entry.parent.clone(),
                    },
                )
            })
            .collect();
        FileTree {
            root: TreeNode {
                id: String::new(),
                name: String::new(),
                cls: NodeKind::Folder,
                hidden: false,
                resolved_path: None,
                state: EvalState::None,
                is_indeterminate: false,
                synthetic: true,
                children,
            },
            index,
        }
    }

    fn build_children(&self, ids: &[String], accept: Option<&RuleMatcher>) -> Vec<TreeNode> {
        let mut nodes: Vec<TreeNode> = ids
            .iter()
            .filter_map(|id| self.build_node(id, accept))
            .collect();
        nodes.sort_by(|a, b| {
            let a_file = a.cls == NodeKind::File;
            let b_file = b.cls == NodeKind::File;
            a_file.cmp(&b_file).then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    fn build_node(&self, id: &str, accept: Option<&RuleMatcher>) -> Option<TreeNode> {
        let entry = self.cache.get(id)?;
        if entry.kind == NodeKind::File {
            if let Some(matcher) = accept {
                if !matcher.is_match(id, entry.kind) {
                    return None;
                }
            }
        }
        Some(TreeNode {
            id: id.to_string(),
            name: display_name(id),
            cls: entry.kind,
            hidden: entry.hidden,
            resolved_path: entry.resolved_path.clone(),
            state: entry.state,
            is_indeterminate: entry.indeterminate,
            synthetic: entry.synthetic,
            children: self.build_children(&entry.children, accept),
        })
    }
}

/// Runs one full evaluation pass.
pub fn evaluate(
    nodes: &[FileTreeNode],
    rules: &[String],
    groups: &FilterGroupCatalog,
    root_path: Option<&str>,
    accept_filter: Option<&str>,
) -> FileTree {
    let rule_set = RuleSet::new(rules, groups);
    let mut builder = TreeBuilder::new(&rule_set);

    let root = root_path
        .filter(|root| !root.is_empty())
        .map(|root| {
            let sep = separator_of(root);
            if root.ends_with(sep) {
                root.to_string()
            } else {
                format!("{}{}", root, sep)
            }
        });
    if let Some(root) = &root {
        builder.insert(&FileTreeNode::folder(root), true);
    }
    for node in nodes {
        builder.insert(node, false);
    }

    let accept = accept_filter
        .map(strip_sign)
        .filter(|filter| !filter.is_empty())
        .and_then(|filter| RuleMatcher::compile(filter).ok());
    debug!(
        "tree: evaluated nodes={} rules={} root_set={}",
        builder.cache.len(),
        rules.len(),
        root.is_some()
    );
    builder.finish(root.as_deref(), accept.as_ref())
}

/// Rule list after the user clicks a node's checkbox.
pub fn toggle(
    rules: &[String],
    groups: &FilterGroupCatalog,
    tree: &FileTree,
    node_id: &str,
    mode: SelectionMode,
) -> Vec<String> {
    if mode == SelectionMode::Single {
        if rules.len() == 1 && rules[0] == node_id {
            return Vec::new();
        }
        return vec![node_id.to_string()];
    }

    let state = tree.state_of(node_id).unwrap_or(EvalState::None);
    let kind = tree.kind_of(node_id).unwrap_or_else(|| {
        if node_id.ends_with(separator_of(node_id)) {
            NodeKind::Folder
        } else {
            NodeKind::File
        }
    });
    let parent_state = tree.parent_state(node_id);
    let state_with =
        |rules: &[String]| RuleSet::new(rules, groups).evaluate_node(node_id, kind, None, parent_state);

    if state == EvalState::ExcludedByParent {
        debug!("tree: toggle ignored, node sits under an excluded folder");
        return rules.to_vec();
    }

    if state.is_included() {
        let include_token = format!("+{}", node_id);
        let mut out: Vec<String> = rules
            .iter()
            .filter(|token| token.as_str() != node_id && **token != include_token)
            .cloned()
            .collect();
        if state_with(&out).is_included() {
            out.insert(0, format!("-{}", node_id));
        }
        return out;
    }

    let exclude_token = format!("-{}", node_id);
    let mut out: Vec<String> = rules
        .iter()
        .filter(|token| **token != exclude_token)
        .cloned()
        .collect();
    if state_with(&out).is_included() {
        return out;
    }
    if kind == NodeKind::Folder {
        out.retain(|token| {
            PathRule::parse(token).is_filter()
                || !(token.starts_with(node_id) && token.as_str() != node_id)
        });
    }
    out.push(node_id.to_string());
    if !state_with(&out).is_included() {
        // A pattern still excludes the node; only an explicit include wins.
        out.pop();
        out.insert(0, format!("+{}", node_id));
    }
    out
}

fn separator_of(id: &str) -> char {
    if id.starts_with('/') || !id.contains('\\') {
        '/'
    } else {
        '\\'
    }
}

/// `/a/b/c.txt` → `/`, `/a/`, `/a/b/`, `/a/b/c.txt`.
fn components(id: &str) -> Vec<String> {
    let sep = separator_of(id);
    let start = if id.starts_with("\\\\") { 2 } else { 0 };
    let mut out: Vec<String> = id
        .char_indices()
        .filter(|(i, c)| *i >= start && *c == sep)
        .map(|(i, c)| id[..i + c.len_utf8()].to_string())
        .collect();
    if !id.is_empty() && !id.ends_with(sep) {
        out.push(id.to_string());
    }
    out
}

fn display_name(id: &str) -> String {
    let sep = separator_of(id);
    let trimmed = id.trim_end_matches(sep);
    if trimmed.is_empty() {
        return id.to_string();
    }
    trimmed
        .rsplit(sep)
        .next()
        .unwrap_or(trimmed)
        .to_string()
}
