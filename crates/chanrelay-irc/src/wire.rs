//! Minimal IRC line protocol: enough of RFC 1459 to register, join, and
//! exchange messages. Protocol completeness is not a goal of the bridge.

use std::fmt;

/// One parsed IRC line: optional prefix, a command, and its parameters
/// (with any trailing parameter as the last element).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcLine {
    pub fn cmd(command: &str, params: &[&str]) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Parse one line (without the trailing CRLF).
    ///
    /// Returns `None` for empty or prefix-only lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut rest = line;

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped.split_once(' ')?;
            rest = tail.trim_start();
            Some(prefix.to_string())
        } else {
            None
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut parts = head.split_ascii_whitespace();
        let command = parts.next()?.to_string();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// The nick portion of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }

    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn trailing(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for IrcLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        if let Some((trailing, leading)) = self.params.split_last() {
            for param in leading {
                write!(f, " {param}")?;
            }
            // The last parameter gets the trailing form whenever it could
            // not round-trip as a middle parameter.
            if trailing.is_empty() || trailing.contains(' ') || trailing.starts_with(':') {
                write!(f, " :{trailing}")?;
            } else {
                write!(f, " {trailing}")?;
            }
        }
        Ok(())
    }
}

/// How a PRIVMSG/NOTICE payload renders as a chat message.
#[derive(Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub content: String,
    pub kind: &'static str,
}

/// Classify a PRIVMSG body, unwrapping CTCP ACTION into an `action`
/// message the way IRC clients render `/me`.
pub fn privmsg_message(from: &str, body: &str) -> ChatMessage {
    if let Some(action) = body
        .strip_prefix("\u{1}ACTION ")
        .and_then(|rest| rest.strip_suffix('\u{1}'))
    {
        ChatMessage {
            from: "-*-".to_string(),
            content: format!("{from} {action}"),
            kind: "action",
        }
    } else {
        ChatMessage {
            from: from.to_string(),
            content: body.to_string(),
            kind: "normal",
        }
    }
}

/// Map a NAMES-list mode sigil to the user mode vocabulary.
pub fn sigil_mode(nick: &str) -> (&str, &'static str) {
    if let Some(rest) = nick.strip_prefix('@') {
        (rest, "operator")
    } else if let Some(rest) = nick.strip_prefix('+') {
        (rest, "voice")
    } else {
        (nick, "")
    }
}
