//! Classification of a single command line.
//!
//! Lines that change session state (`cd`, `source`/`.`, `export`, `unset`)
//! are interpreted in-process; everything else runs in a child shell.
//! A directive keyword followed by shell operators (`cd x && make`) is not a
//! directive and runs as a plain command.

use relay_core::{EnvStore, RelayError, env_store::is_valid_name};

/// What a command line asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    /// `cd [path]`. `None` means the workspace root.
    ChangeDir(Option<String>),
    /// `source path` or `. path`.
    Source(String),
    /// `export NAME=VALUE ...`, values already expanded.
    Export(Vec<(String, String)>),
    /// `unset NAME ...`.
    Unset(Vec<String>),
    /// Anything else.
    Run(&'a str),
}

impl<'a> Directive<'a> {
    /// Classify `line`. First match wins: cd, source, export, unset, run.
    ///
    /// `env` is used to expand `$NAME` references in export values.
    ///
    /// # Errors
    /// Returns `RelayError::InvalidDirective` for malformed directives.
    pub fn parse(line: &'a str, env: &EnvStore) -> Result<Self, RelayError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let is_directive = matches!(word, "cd" | "source" | "." | "export" | "unset");
        if !is_directive || has_unquoted_operator(line) {
            return Ok(Self::Run(line));
        }

        match word {
            "cd" => {
                let mut args = split_args(rest)?;
                match args.len() {
                    0 => Ok(Self::ChangeDir(None)),
                    1 => Ok(Self::ChangeDir(args.pop())),
                    _ => Err(RelayError::InvalidDirective("cd: too many arguments".into())),
                }
            }
            "source" | "." => split_args(rest)?
                .into_iter()
                .next()
                .map(Self::Source)
                .ok_or_else(|| RelayError::InvalidDirective(format!("{word}: filename argument required"))),
            "export" if rest.is_empty() => Ok(Self::Run(line)),
            "export" => {
                let expanded = expand_vars(rest, env);
                split_args(&expanded)?
                    .into_iter()
                    .map(|part| match part.split_once('=') {
                        Some((name, value)) if is_valid_name(name) => Ok((name.to_string(), value.to_string())),
                        _ => Err(RelayError::InvalidDirective(format!("Invalid export: {part}"))),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Export)
            }
            _ => {
                let names: Vec<String> = split_args(rest)?
                    .into_iter()
                    .filter(|n| !n.starts_with('-'))
                    .collect();
                if names.is_empty() {
                    return Err(RelayError::InvalidDirective("Usage: unset NAME".into()));
                }
                if let Some(bad) = names.iter().find(|n| !is_valid_name(n)) {
                    return Err(RelayError::InvalidDirective(format!("unset: invalid name: {bad}")));
                }
                Ok(Self::Unset(names))
            }
        }
    }
}

fn split_args(rest: &str) -> Result<Vec<String>, RelayError> {
    shlex::split(rest).ok_or_else(|| RelayError::InvalidDirective(format!("Unbalanced quotes: {rest}")))
}

/// Whether `s` contains a newline, `;`, `|`, `&`, `<`, `>`, a backtick or `$(` outside quotes.
fn has_unquoted_operator(s: &str) -> bool {
    let mut single = false;
    let mut double = false;
    let mut escaped = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if !single => escaped = true,
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            _ if single => {}
            '`' => return true,
            '$' if chars.peek() == Some(&'(') => return true,
            ';' | '|' | '&' | '<' | '>' | '\n' if !double => return true,
            _ => {}
        }
    }
    false
}

/// Substitute `$NAME` and `${NAME}` outside single quotes.
///
/// Substituted values are re-quoted so that a later `shlex::split` yields
/// them verbatim. Unknown names expand to the empty string.
fn expand_vars(s: &str, env: &EnvStore) -> String {
    let mut out = String::with_capacity(s.len());
    let mut single = false;
    let mut double = false;
    let mut chars = s.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' if !single => {
                out.push(c);
                if let Some((_, next)) = chars.next() {
                    out.push(next);
                }
            }
            '\'' if !double => {
                single = !single;
                out.push(c);
            }
            '"' if !single => {
                double = !double;
                out.push(c);
            }
            '$' if !single => {
                let rest = &s[i + 1..];
                let (name, consumed) = if let Some(braced) = rest.strip_prefix('{') {
                    match braced.find('}') {
                        Some(end) => (&braced[..end], end + 2),
                        None => ("", 0),
                    }
                } else {
                    let end = rest
                        .find(|ch: char| !(ch == '_' || ch.is_ascii_alphanumeric()))
                        .unwrap_or(rest.len());
                    (&rest[..end], end)
                };
                if name.is_empty() || !is_valid_name(name) {
                    out.push(c);
                    continue;
                }
                for _ in 0..rest[..consumed].chars().count() {
                    chars.next();
                }
                let value = env.get(name).unwrap_or_default();
                if double {
                    for ch in value.chars() {
                        if matches!(ch, '"' | '\\' | '$' | '`') {
                            out.push('\\');
                        }
                        out.push(ch);
                    }
                } else {
                    out.push_str(&shlex::try_quote(value).unwrap_or_default());
                }
            }
            _ => out.push(c),
        }
    }
    out
}
