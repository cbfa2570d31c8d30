//! Inclusion and exclusion rules for backup sources.

pub mod groups;
pub mod rule;
pub mod tree;

pub use groups::{expand, FilterGroupCatalog};
pub use rule::{matches, parse_rule_list, NodeKind, PathRule, RuleMatcher, RuleSign};
pub use tree::{evaluate, toggle, EvalState, FileTree, FileTreeNode, SelectionMode, TreeNode};
