//! Addressable terminal pane.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A multiplexer pane: `session:window.pane`.
///
/// Immutable once bound; rebinding replaces it wholesale. Serializes as the
/// locator string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TerminalTarget {
    pub session_name: String,
    pub window_index: u32,
    pub pane_index: u32,
}

impl TerminalTarget {
    #[must_use]
    pub fn new(session_name: impl Into<String>, window_index: u32, pane_index: u32) -> Self {
        Self {
            session_name: session_name.into(),
            window_index,
            pane_index,
        }
    }

    /// First pane of the first window of a session.
    #[must_use]
    pub fn session(session_name: impl Into<String>) -> Self {
        Self::new(session_name, 0, 0)
    }
}

impl fmt::Display for TerminalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.session_name, self.window_index, self.pane_index)
    }
}

impl FromStr for TerminalTarget {
    type Err = String;

    /// Accepts `session`, `session:window` and `session:window.pane`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (session, rest) = match s.rsplit_once(':') {
            Some((session, rest)) => (session, Some(rest)),
            None => (s, None),
        };
        if session.is_empty() || session.contains(char::is_whitespace) {
            return Err(format!("Invalid terminal target: '{s}'"));
        }
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| format!("Invalid terminal target: '{s}'"))
        };
        let (window, pane) = match rest {
            None => (0, 0),
            Some(rest) => match rest.split_once('.') {
                Some((w, p)) => (parse(w)?, parse(p)?),
                None => (parse(rest)?, 0),
            },
        };
        Ok(Self::new(session, window, pane))
    }
}

impl TryFrom<String> for TerminalTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TerminalTarget> for String {
    fn from(target: TerminalTarget) -> Self {
        target.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("codex-demo".parse::<TerminalTarget>().unwrap(), TerminalTarget::session("codex-demo"));
        assert_eq!("a:2".parse::<TerminalTarget>().unwrap(), TerminalTarget::new("a", 2, 0));
        assert_eq!("a:2.3".parse::<TerminalTarget>().unwrap(), TerminalTarget::new("a", 2, 3));
        assert!("".parse::<TerminalTarget>().is_err());
        assert!("a:x.1".parse::<TerminalTarget>().is_err());
        assert!(":1.1".parse::<TerminalTarget>().is_err());
    }

    #[test]
    fn test_serializes_as_locator() {
        let target = TerminalTarget::new("codex-demo", 0, 1);
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, "\"codex-demo:0.1\"");
        let back: TerminalTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
    }
}
