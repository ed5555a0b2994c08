/// Chat command parsing.
///
/// One received chunk becomes one [`Command`]. Only four forms are special:
///   `/user <name>`, `/w <target> <text>`, `/typing-start`, `/typing-end`
///
/// Everything else, including unknown `/`-prefixed lines, is plain chat text.

pub const IDENTIFY_PREFIX: &str = "/user ";
const WHISPER_PREFIX: &str = "/w ";
pub const TYPING_START: &str = "/typing-start";
pub const TYPING_END: &str = "/typing-end";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Claim a display name with `/user <name>`.
    Identify(String),
    /// Plain chat text, broadcast to everyone but the sender.
    Broadcast(String),
    /// Private message, `/w <target> <text>`.
    DirectMessage { target: String, text: String },
    TypingStart,
    TypingEnd,
    /// A recognised form with a malformed body. Dropped silently.
    Unrecognized,
}

impl Command {
    /// Parse a single chunk. Trailing whitespace is stripped first.
    pub fn parse(input: &str) -> Self {
        let line = input.trim_end();

        if let Some(name) = line.strip_prefix(IDENTIFY_PREFIX) {
            return Command::Identify(name.to_owned());
        }

        if let Some(rest) = line.strip_prefix(WHISPER_PREFIX) {
            // Target is the first token; the text may be empty but the
            // separator after the target may not.
            return match rest.trim_start().split_once(char::is_whitespace) {
                Some((target, text)) => Command::DirectMessage {
                    target: target.to_owned(),
                    text: text.to_owned(),
                },
                None => Command::Unrecognized,
            };
        }

        match line {
            TYPING_START => Command::TypingStart,
            TYPING_END => Command::TypingEnd,
            _ => Command::Broadcast(line.to_owned()),
        }
    }
}
