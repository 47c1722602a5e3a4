//! Slash commands.
//!
//! Built-in commands come first; discovered skills add `/skill:<name>` and
//! flow skills additionally add `/flow:<name>`.

use crate::skill::Skill;

/// What a slash command does when invoked.
#[derive(Debug, Clone)]
pub enum SlashCommandKind {
    /// Reset the context (with backup rotation).
    Clear,
    /// Force a compaction now.
    Compact,
    /// Inject the skill body as a user turn.
    Skill(Skill),
    /// Walk the skill's flowchart.
    Flow(Skill),
}

/// A registered slash command.
#[derive(Debug, Clone)]
pub struct SlashCommand {
    /// Command name, without the leading slash.
    pub name: String,
    /// One-line description for `initialize` responses.
    pub description: String,
    /// Alternative names.
    pub aliases: Vec<String>,
    /// What it does.
    pub kind: SlashCommandKind,
}

impl SlashCommand {
    /// Whether `name` addresses this command.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|alias| alias == name)
    }
}

/// A parsed `/name args` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommandCall {
    /// Command name, without the slash.
    pub name: String,
    /// Everything after the name.
    pub args: String,
}

/// Parse a user input as a slash command call.
///
/// Only inputs whose first token starts with `/` followed by a plausible
/// command name qualify; everything else is a normal prompt.
#[must_use]
pub fn parse_slash_command_call(text: &str) -> Option<SlashCommandCall> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_'))
    {
        return None;
    }
    Some(SlashCommandCall {
        name: name.to_string(),
        args: args.to_string(),
    })
}

/// The built-in command set.
#[must_use]
pub(crate) fn builtin_commands() -> Vec<SlashCommand> {
    vec![
        SlashCommand {
            name: "clear".to_string(),
            description: "Clear the conversation and start fresh.".to_string(),
            aliases: Vec::new(),
            kind: SlashCommandKind::Clear,
        },
        SlashCommand {
            name: "compact".to_string(),
            description: "Compact the conversation into a summary.".to_string(),
            aliases: Vec::new(),
            kind: SlashCommandKind::Compact,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let call = parse_slash_command_call("/clear").unwrap();
        assert_eq!(call.name, "clear");
        assert_eq!(call.args, "");
    }

    #[test]
    fn test_parse_with_args() {
        let call = parse_slash_command_call("/skill:review the last commit").unwrap();
        assert_eq!(call.name, "skill:review");
        assert_eq!(call.args, "the last commit");
    }

    #[test]
    fn test_non_commands_pass_through() {
        assert!(parse_slash_command_call("hello /world").is_none());
        assert!(parse_slash_command_call("/").is_none());
        assert!(parse_slash_command_call("/weird!name").is_none());
        assert!(parse_slash_command_call("ls -la").is_none());
    }

    #[test]
    fn test_matches_aliases() {
        let command = SlashCommand {
            name: "clear".to_string(),
            description: String::new(),
            aliases: vec!["reset".to_string()],
            kind: SlashCommandKind::Clear,
        };
        assert!(command.matches("clear"));
        assert!(command.matches("reset"));
        assert!(!command.matches("compact"));
    }
}
