//! Parsing of `/`-prefixed lines sent by an active participant.

/// Lines starting with this are commands, never chat.
pub const COMMAND_PREFIX: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Users,
    Time,
    Quit,
    /// Anything else with the prefix. Holds the trimmed input as typed.
    Unknown(String),
}

impl Command {
    /// Returns `None` for plain chat lines.
    ///
    /// The verb is the first whitespace separated word and is matched case-insensitively; anything
    /// after it is ignored.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if !line.starts_with(COMMAND_PREFIX) {
            return None;
        }
        let verb = line.split_whitespace().next().unwrap_or(line);
        let command = match &verb.to_lowercase()[..] {
            "/help" => Command::Help,
            "/users" => Command::Users,
            "/time" => Command::Time,
            "/quit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello /help"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn verbs_are_case_insensitive_and_whitespace_tolerant() {
        assert_eq!(Command::parse("/HELP"), Some(Command::Help));
        assert_eq!(Command::parse("  /Users  "), Some(Command::Users));
        assert_eq!(Command::parse("/time\t"), Some(Command::Time));
        assert_eq!(Command::parse("/quit now"), Some(Command::Quit));
    }

    #[test]
    fn unknown_keeps_the_input() {
        assert_eq!(
            Command::parse(" /Dance  wildly "),
            Some(Command::Unknown("/Dance  wildly".to_string()))
        );
        assert_eq!(Command::parse("/"), Some(Command::Unknown("/".to_string())));
    }
}
