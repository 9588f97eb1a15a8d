//! Ordered environment store with redaction and script parsing.

use std::{io, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Mask shown in place of secret-like values.
pub const REDACTED: &str = "***";

/// Lowercase key fragments that mark a value as secret.
const SECRET_MARKERS: &[&str] = &["token", "secret", "key", "password", "passwd"];

/// Ordered mapping of environment variable names to values.
///
/// Insertion order is preserved; re-setting an existing key keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvStore {
    vars: IndexMap<String, String>,
}

impl EnvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Upsert each pair in the given order; later pairs win.
    pub fn merge<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in pairs {
            self.set(k, v);
        }
    }

    /// Remove a key. Absent keys are not an error.
    pub fn unset(&mut self, name: &str) -> Option<String> {
        self.vars.shift_remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy of the store with secret-like values masked.
    #[must_use]
    pub fn redacted_view(&self) -> IndexMap<String, String> {
        self.vars
            .iter()
            .map(|(k, v)| {
                let shown = if is_secret_key(k) {
                    REDACTED.to_string()
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect()
    }

    /// Read a script file and extract its assignments.
    ///
    /// `$NAME` references resolve against `scope` and earlier lines of the file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read as UTF-8.
    pub fn source_script(path: &Path, scope: &Self) -> io::Result<Vec<(String, String)>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse_script(&contents, scope))
    }

    /// Extract `export NAME=VALUE` and `NAME=VALUE` lines.
    ///
    /// Line oriented and permissive: anything that does not look like a simple
    /// assignment is skipped. Unquoted and double-quoted values expand
    /// `$NAME`/`${NAME}`; single-quoted values are literal. Unknown names
    /// expand to nothing.
    #[must_use]
    pub fn parse_script(contents: &str, scope: &Self) -> Vec<(String, String)> {
        let mut scope = scope.clone();
        contents
            .lines()
            .filter_map(|line| {
                let (name, value) = parse_assignment_line(line, &scope)?;
                scope.set(name.clone(), value.clone());
                Some((name, value))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvStore {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut store = Self::new();
        store.merge(iter);
        store
    }
}

/// Whether the key names something that should never be displayed.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether `name` is a valid shell variable name.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn parse_assignment_line(line: &str, scope: &EnvStore) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = match line.strip_prefix("export") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
        _ => line,
    };
    let (name, raw) = line.split_once('=')?;
    if !is_valid_name(name) {
        return None;
    }
    Some((name.to_string(), parse_value(raw, scope)?))
}

fn parse_value(raw: &str, scope: &EnvStore) -> Option<String> {
    if let Some(body) = raw.strip_prefix('\'') {
        return body.find('\'').map(|end| body[..end].to_string());
    }
    if let Some(body) = raw.strip_prefix('"') {
        return expand(body, Some('"'), scope);
    }
    let end = raw
        .char_indices()
        .find(|&(i, c)| c == '#' && raw[..i].ends_with(char::is_whitespace))
        .map_or(raw.len(), |(i, _)| i);
    expand(raw[..end].trim_end(), None, scope)
}

/// Substitute variable references up to `close`. A backslash escapes the next
/// character. `None` if `close` is given but never found.
fn expand(text: &str, close: Option<char>, scope: &EnvStore) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    out.push(next);
                }
            }
            c if Some(c) == close => return Some(out),
            '$' => match var_ref(&text[i + 1..]) {
                Some((name, consumed)) => {
                    out.push_str(scope.get(name).unwrap_or_default());
                    chars.nth(consumed - 1);
                }
                None => out.push(c),
            },
            _ => out.push(c),
        }
    }
    close.is_none().then_some(out)
}

/// Name and byte length of a `NAME` or `{NAME}` reference at the start of `rest`.
fn var_ref(rest: &str) -> Option<(&str, usize)> {
    let (name, consumed) = match rest.strip_prefix('{') {
        Some(braced) => {
            let end = braced.find('}')?;
            (&braced[..end], end + 2)
        }
        None => {
            let end = rest
                .find(|c: char| !(c == '_' || c.is_ascii_alphanumeric()))
                .unwrap_or(rest.len());
            (&rest[..end], end)
        }
    };
    is_valid_name(name).then_some((name, consumed))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_merge_later_wins_and_keeps_order() {
        let mut env = EnvStore::new();
        env.set("A", "1");
        env.set("B", "2");
        env.merge([("A", "x"), ("C", "3"), ("A", "y")]);

        let keys: Vec<_> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert_eq!(env.get("A"), Some("y"));
    }

    #[test]
    fn test_unset_absent_is_noop() {
        let mut env: EnvStore = [("A", "1")].into_iter().collect();
        assert_eq!(env.unset("MISSING"), None);
        assert_eq!(env.unset("A"), Some("1".to_string()));
        assert!(env.is_empty());
    }

    #[test]
    fn test_parse_script_mixed_lines() {
        let script = "export A=1\nB=2\n# comment\n";
        assert_eq!(EnvStore::parse_script(script, &EnvStore::new()), pairs(&[("A", "1"), ("B", "2")]));
    }

    #[test]
    fn test_parse_script_quotes_and_junk() {
        let script = r#"
            export GREETING="hello world"
            SINGLE='it''s'
            ESCAPED="say \"hi\""
            TRAILING=value # note
            if [ -f x ]; then
            1BAD=nope
            UNTERMINATED="oops
            export
            EMPTY=
            URL=http://host/#anchor
        "#;
        assert_eq!(
            EnvStore::parse_script(script, &EnvStore::new()),
            pairs(&[
                ("GREETING", "hello world"),
                ("SINGLE", "it"),
                ("ESCAPED", "say \"hi\""),
                ("TRAILING", "value"),
                ("EMPTY", ""),
                ("URL", "http://host/#anchor"),
            ])
        );
    }

    #[test]
    fn test_parse_script_expands_references() {
        let scope: EnvStore = [("PATH", "/usr/bin:/bin"), ("HOME", "/home/me")].into_iter().collect();
        let script = r#"
            VIRTUAL_ENV="/ws/.venv"
            export PATH="$VIRTUAL_ENV/bin:$PATH"
            CACHE=${HOME}/cache
            LITERAL='$HOME'
            ESCAPED="\$HOME"
            MISSING="[$NOPE]"
            PRICE=$5
        "#;
        assert_eq!(
            EnvStore::parse_script(script, &scope),
            pairs(&[
                ("VIRTUAL_ENV", "/ws/.venv"),
                ("PATH", "/ws/.venv/bin:/usr/bin:/bin"),
                ("CACHE", "/home/me/cache"),
                ("LITERAL", "$HOME"),
                ("ESCAPED", "$HOME"),
                ("MISSING", "[]"),
                ("PRICE", "$5"),
            ])
        );
        assert_eq!(scope.get("PATH"), Some("/usr/bin:/bin"));
    }

    #[test]
    fn test_redacted_view_masks_secrets() {
        let env: EnvStore = [
            ("GITHUB_TOKEN", "ghp_abcdef"),
            ("Api_Key", ""),
            ("DB_PASSWORD", "x"),
            ("client_secret", "a-very-long-secret-value"),
            ("HOME", "/home/me"),
        ]
        .into_iter()
        .collect();

        let view = env.redacted_view();
        for key in ["GITHUB_TOKEN", "Api_Key", "DB_PASSWORD", "client_secret"] {
            assert_eq!(view[key], REDACTED, "{key} leaked");
        }
        assert_eq!(view["HOME"], "/home/me");
        assert_eq!(env.get("GITHUB_TOKEN"), Some("ghp_abcdef"));
    }

    #[test]
    fn test_source_script_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EnvStore::source_script(&dir.path().join("nope.env"), &EnvStore::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("_X1"));
        assert!(!is_valid_name("1X"));
        assert!(!is_valid_name("A-B"));
        assert!(!is_valid_name(""));
    }
}
