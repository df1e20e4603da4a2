//! Everything the server says to a client.
//!
//! Each variant renders to the exact text sent on the wire. `Help` is the only multi-line notice;
//! the client prints whatever lines arrive, so no framing beyond `\n` is needed.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// Commands listed by `/help`, in display order.
pub const COMMANDS: [(&str, &str); 4] = [
    ("/help", "показать эту справку"),
    ("/users", "список пользователей онлайн"),
    ("/time", "текущее время"),
    ("/quit", "покинуть чат"),
];

/// Marker the client looks for to know a nickname was refused.
pub const NICKNAME_TAKEN_MARKER: &str = "уже занят";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Asks for a nickname. Sent on connect and after every rejection.
    Prompt,
    Welcome(Arc<str>),
    Online(usize),
    NicknameTaken(String),
    Joined(Arc<str>),
    Left(Arc<str>),
    /// A chat line relayed to the other participants.
    Chat {
        at: DateTime<Local>,
        from: Arc<str>,
        text: String,
    },
    Help,
    Users(Vec<Arc<str>>),
    Time(DateTime<Local>),
    Farewell,
    UnknownCommand(String),
}

impl Notice {
    pub fn chat(from: Arc<str>, text: &str) -> Notice {
        Notice::Chat {
            at: Local::now(),
            from,
            text: text.to_string(),
        }
    }

    pub fn now() -> Notice {
        Notice::Time(Local::now())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Notice::Prompt => write!(f, "Введите ваш никнейм:"),
            Notice::Welcome(nick) => write!(f, "✅ Добро пожаловать в чат, {}!", nick),
            Notice::Online(count) => write!(f, "📊 Пользователей онлайн: {}", count),
            Notice::NicknameTaken(nick) => write!(
                f,
                "❌ Никнейм '{}' {}. Попробуйте другой.",
                nick, NICKNAME_TAKEN_MARKER
            ),
            Notice::Joined(nick) => write!(f, "👋 {} присоединился к чату!", nick),
            Notice::Left(nick) => write!(f, "👋 {} покинул чат!", nick),
            Notice::Chat { at, from, text } => {
                write!(f, "[{}] {}: {}", at.format("%H:%M:%S"), from, text)
            }
            Notice::Help => {
                write!(f, "📋 Доступные команды:")?;
                for (name, description) in COMMANDS.iter() {
                    write!(f, "\n{} - {}", name, description)?;
                }
                Ok(())
            }
            Notice::Users(names) => {
                let names: Vec<&str> = names.iter().map(|name| &**name).collect();
                write!(f, "👥 Пользователи онлайн ({}): {}", names.len(), names.join(", "))
            }
            Notice::Time(at) => write!(f, "🕐 Текущее время: {}", at.format("%Y-%m-%d %H:%M:%S")),
            Notice::Farewell => write!(f, "👋 До свидания!"),
            Notice::UnknownCommand(input) => write!(
                f,
                "❌ Неизвестная команда: {}. Введите /help для справки.",
                input
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chat_line_carries_timestamp_sender_and_text() {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let notice = Notice::Chat {
            at,
            from: Arc::from("Alice"),
            text: "hi".to_string(),
        };
        assert_eq!(notice.to_string(), "[09:05:07] Alice: hi");
    }

    #[test]
    fn users_lists_count_and_names() {
        let notice = Notice::Users(vec![Arc::from("Alice"), Arc::from("Bob")]);
        assert_eq!(notice.to_string(), "👥 Пользователи онлайн (2): Alice, Bob");
    }

    #[test]
    fn help_lists_every_command() {
        let help = Notice::Help.to_string();
        for (name, _) in COMMANDS.iter() {
            assert!(help.contains(name), "{} missing from help", name);
        }
    }

    #[test]
    fn taken_notice_names_the_nickname() {
        let text = Notice::NicknameTaken("Alice".to_string()).to_string();
        assert!(text.contains("'Alice'"));
        assert!(text.contains(NICKNAME_TAKEN_MARKER));
    }

    #[test]
    fn unknown_command_hints_at_help() {
        let text = Notice::UnknownCommand("/dance".to_string()).to_string();
        assert!(text.contains("/dance"));
        assert!(text.contains("/help"));
    }
}
