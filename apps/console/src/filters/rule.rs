//! Single path rules: parsing the sign, classifying the body and matching it
//! against a node of the file tree.

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSign {
    Include,
    Exclude,
    /// Bare token without a sign.
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub sign: RuleSign,
    pub body: String,
}

impl PathRule {
    pub fn parse(token: &str) -> Self {
        let (sign, body) = split_sign(token);
        Self {
            sign,
            body: body.to_string(),
        }
    }

    pub fn is_decorated(&self) -> bool {
        self.sign != RuleSign::Implicit
    }

    /// True when the body uses glob, regex or filter-group syntax rather than naming a path.
    pub fn is_pattern(&self) -> bool {
        let body = self.body.as_str();
        body.contains('*')
            || body.contains('?')
            || is_wrapped(body, '[', ']')
            || is_wrapped(body, '{', '}')
    }

    /// Rules that take part in first-match filter scanning. Unsigned patterns
    /// act as exclusions; unsigned literal paths are plain selections.
    pub fn is_filter(&self) -> bool {
        self.is_decorated() || self.is_pattern()
    }

    pub fn includes(&self) -> bool {
        self.sign == RuleSign::Include
    }

    pub fn to_token(&self) -> String {
        match self.sign {
            RuleSign::Include => format!("+{}", self.body),
            RuleSign::Exclude => format!("-{}", self.body),
            RuleSign::Implicit => self.body.clone(),
        }
    }
}

fn split_sign(token: &str) -> (RuleSign, &str) {
    if let Some(rest) = token.strip_prefix('+') {
        (RuleSign::Include, rest)
    } else if let Some(rest) = token.strip_prefix('-') {
        (RuleSign::Exclude, rest)
    } else {
        (RuleSign::Implicit, token)
    }
}

/// The rule body with any leading sign removed.
pub fn strip_sign(token: &str) -> &str {
    split_sign(token).1
}

/// Splits a stored rule list on newlines and NUL separators, dropping empty tokens.
pub fn parse_rule_list(raw: &str) -> Vec<String> {
    raw.split(['\n', '\0'])
        .map(|token| token.trim_end_matches('\r'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_wrapped(body: &str, open: char, close: char) -> bool {
    body.len() >= 2 && body.starts_with(open) && body.ends_with(close)
}

/// `/a/b/`, `C:\a\` or `\\server\share\`. Glob characters are part of the
/// folder name here: `/Music [FLAC]/` names one folder.
fn is_absolute_folder(body: &str) -> bool {
    if body.starts_with('/') && body.ends_with('/') {
        return true;
    }
    let bytes = body.as_bytes();
    let drive_root = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && bytes[2] == b'\\';
    (drive_root || body.starts_with("\\\\")) && body.ends_with('\\')
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
    #[error("invalid glob: {0}")]
    Glob(#[from] globset::Error),
}

/// A rule body compiled into a predicate over `(node id, node kind)`.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    Never,
    ExactFolder(String),
    FolderContains(String),
    FileRegex(Regex),
    Regex(Regex),
    Extension(String),
    Glob(GlobMatcher),
}

impl RuleMatcher {
    /// Compiles a sign-stripped rule body. Forms are tried in a fixed order and
    /// the first syntactic match decides how the body is interpreted.
    pub fn compile(body: &str) -> Result<Self, RuleError> {
        if body.is_empty() {
            return Ok(RuleMatcher::Never);
        }
        if is_absolute_folder(body) {
            return Ok(RuleMatcher::ExactFolder(body.to_string()));
        }
        if let Some(name) = folder_contains_name(body) {
            if name.is_empty() {
                return Ok(RuleMatcher::Never);
            }
            return Ok(RuleMatcher::FolderContains(name.to_string()));
        }
        if let Some(inner) = file_regex_inner(body) {
            let regex = Regex::new(&format!("^.*(?:{})[^/\\\\]*$", translate_regex(inner)))?;
            return Ok(RuleMatcher::FileRegex(regex));
        }
        if is_wrapped(body, '[', ']') {
            let inner = &body[1..body.len() - 1];
            let regex = Regex::new(&format!("^(?:{})$", translate_regex(inner)))?;
            return Ok(RuleMatcher::Regex(regex));
        }
        if let Some(ext) = body.strip_prefix("*.") {
            if !ext.contains(['*', '?', '[', ']', '/', '\\']) {
                if ext.is_empty() {
                    return Ok(RuleMatcher::Never);
                }
                return Ok(RuleMatcher::Extension(format!(".{}", ext)));
            }
        }
        Ok(RuleMatcher::Glob(compile_glob(body)?))
    }

    pub fn is_match(&self, node_id: &str, kind: NodeKind) -> bool {
        match self {
            RuleMatcher::Never => false,
            RuleMatcher::ExactFolder(path) => kind == NodeKind::Folder && node_id == path,
            RuleMatcher::FolderContains(name) => {
                kind == NodeKind::Folder
                    && (node_id.contains(&format!("{}/", name))
                        || node_id.contains(&format!("{}\\", name)))
            }
            RuleMatcher::FileRegex(regex) => kind == NodeKind::File && regex.is_match(node_id),
            RuleMatcher::Regex(regex) => regex.is_match(node_id),
            RuleMatcher::Extension(ext) => kind == NodeKind::File && node_id.ends_with(ext.as_str()),
            RuleMatcher::Glob(glob) => glob.is_match(node_id),
        }
    }
}

/// One-shot match of a rule token against a node. A body that fails to
/// compile never matches.
pub fn matches(rule: &str, node_id: &str, kind: NodeKind) -> bool {
    match RuleMatcher::compile(strip_sign(rule)) {
        Ok(matcher) => matcher.is_match(node_id, kind),
        Err(err) => {
            tracing::debug!("rule: ignoring malformed rule error={}", err);
            false
        }
    }
}

/// `*name*/`
fn folder_contains_name(body: &str) -> Option<&str> {
    let name = body.strip_prefix('*')?.strip_suffix("*/")?;
    if name.contains(['*', '?', '[', ']']) {
        return None;
    }
    Some(name)
}

/// `[.*name[^\/]*]` as written by the "file name contains" shortcut.
fn file_regex_inner(body: &str) -> Option<&str> {
    let rest = body.strip_prefix("[.*")?;
    ["[^\\/]*]", "[^/]*]", "[^\\\\/]*]"]
        .iter()
        .find_map(|suffix| rest.strip_suffix(suffix))
        .filter(|inner| !inner.is_empty())
}

/// Rewrites a saved pattern into the `regex` crate dialect: a leading `@` is
/// dropped and named groups become plain groups.
///
/// Lookaround and backreferences have no equivalent and fail to compile,
/// which makes the rule inert.
pub fn translate_regex(pattern: &str) -> String {
    let mut rest = pattern.strip_prefix('@').unwrap_or(pattern);
    let mut out = String::with_capacity(rest.len());
    while let Some(pos) = rest.find("(?") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let name = after
            .strip_prefix("P<")
            .or_else(|| after.strip_prefix('<'))
            .and_then(|tail| tail.split_once('>'))
            .filter(|(name, _)| is_group_name(name));
        match name {
            Some((_, tail)) => {
                out.push('(');
                rest = tail;
            }
            None => {
                out.push_str("(?");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_group_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Generic glob over the whole node id: `*` and `?` cross separators and
/// `[!set]` negates a class. A leading `*` leaves the start open so the rule
/// only has to match a suffix of the id.
pub fn compile_glob(body: &str) -> Result<GlobMatcher, globset::Error> {
    let pattern = if body.starts_with('*') {
        body.to_string()
    } else {
        format!("*{}", body)
    };
    let glob = GlobBuilder::new(&pattern)
        .literal_separator(false)
        .backslash_escape(false)
        .build()?;
    Ok(glob.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use NodeKind::{File, Folder};

    #[test]
    fn parses_signs() {
        assert_eq!(PathRule::parse("-/tmp/").sign, RuleSign::Exclude);
        assert_eq!(PathRule::parse("+/tmp/").sign, RuleSign::Include);
        let bare = PathRule::parse("/home/");
        assert_eq!(bare.sign, RuleSign::Implicit);
        assert!(!bare.is_filter());
        assert!(PathRule::parse("*.tmp").is_filter());
        assert_eq!(PathRule::parse("-*.log").to_token(), "-*.log");
    }

    #[test]
    fn rule_list_splits_on_newline_and_nul() {
        let rules = parse_rule_list("/home/\r\n-*.tmp\0\0+/home/keep/\n");
        assert_eq!(rules, vec!["/home/", "-*.tmp", "+/home/keep/"]);
    }

    #[test]
    fn exact_folder_only_matches_folders() {
        assert!(matches("-/home/secret/", "/home/secret/", Folder));
        assert!(!matches("-/home/secret/", "/home/secret/", File));
        assert!(!matches("-/home/secret/", "/home/secret/x/", Folder));
        assert!(matches("-C:\\Users\\", "C:\\Users\\", Folder));
    }

    #[test]
    fn folder_name_contains() {
        assert!(matches("-*cache*/", "/home/u/.cache/thumbs/", Folder));
        assert!(!matches("-*cache*/", "/home/u/cache.txt", File));
        assert!(!matches("-**/", "/anything/", Folder));
    }

    #[test]
    fn file_name_regex_shorthand() {
        let rule = "-[.*backup[^\\/]*]";
        assert!(matches(rule, "/data/old-backup.zip", File));
        assert!(!matches(rule, "/data/backup/", Folder));
        assert!(!matches(rule, "/backup/readme.txt", File));
    }

    #[test]
    fn bracketed_regex_uses_translated_dialect() {
        assert!(matches("-[.*/(?<name>node_modules)/]", "/src/app/node_modules/", Folder));
        assert!(matches("-[@.*\\.bak]", "/a/b.bak", File));
        assert!(!matches("-[.*\\.bak]", "/a/b.bak.txt", File));
    }

    #[test]
    fn malformed_regex_never_matches() {
        assert!(!matches("-[(?<=x)y]", "/xy", File));
        assert!(!matches("-[(unclosed]", "/unclosed", File));
    }

    #[test]
    fn extension_glob() {
        assert!(matches("*.tmp", "/data/cache.tmp", File));
        assert!(!matches("*.tmp", "/data/cache.tmp.bak", File));
        assert!(!matches("*.tmp", "/data/dir.tmp", Folder));
        assert!(!matches("*.", "/data/file.", File));
    }

    #[test]
    fn glob_fallback_is_anchored_at_end() {
        assert!(matches("-/var/log/*.gz", "/var/log/syslog.1.gz", File));
        assert!(matches("-?at.jpg", "/pics/cat.jpg", File));
        assert!(matches("-/pics/[!c]at.jpg", "/pics/bat.jpg", File));
        assert!(!matches("-/pics/[!c]at.jpg", "/pics/cat.jpg", File));
        assert!(!matches("-/var/log/*.gz", "/var/log/syslog.gz.old", File));
    }

    #[test]
    fn glob_keeps_backslashes_literal() {
        assert!(matches("-C:\\Temp\\*.log", "C:\\Temp\\run.log", File));
        assert!(!matches("-C:\\Temp\\*.log", "C:\\Other\\run.log", File));
    }

    #[test]
    fn folder_with_glob_characters_is_exact() {
        assert!(matches("-/home/Music [FLAC]/", "/home/Music [FLAC]/", Folder));
        assert!(!matches("-/home/Music [FLAC]/", "/home/Music F/", Folder));
        assert!(matches("-/srv/what?/", "/srv/what?/", Folder));
        assert!(!matches("-/srv/what?/", "/srv/whatx/", Folder));
    }

    #[test]
    fn empty_body_never_matches() {
        assert!(!matches("-", "/", Folder));
        assert!(!matches("", "/a", File));
    }

    #[test]
    fn unexpanded_group_is_inert() {
        assert!(!matches("-{TempFiles}", "/tmp/", Folder));
    }

    #[test]
    fn translate_keeps_lookbehind_markers() {
        assert_eq!(translate_regex("(?<year>\\d{4})"), "(\\d{4})");
        assert_eq!(translate_regex("(?<=a)b"), "(?<=a)b");
    }
}
