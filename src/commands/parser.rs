//! Parser for bot commands in review-comment text.
//!
//! The grammar is line-oriented: a line addresses the bot when it starts
//! with `@<bot_name>` (case-sensitive, at a word boundary), and any later
//! token on that same line naming a command keyword triggers that command.
//! The scanner is decoupled from the keyword table in `types`.

use super::types::{lookup_keyword, Command};

/// The bot's name, without the `@` prefix.
pub const BOT_NAME: &str = "bunnybot";

/// Parses the first bot command found in a comment body.
///
/// # Parsing rules
///
/// - Only lines beginning with `@{bot_name}` are considered; the trigger is
///   case-sensitive and must be followed by whitespace or end of line.
/// - After the trigger, tokens on the same line are stripped of surrounding
///   punctuation and matched against the keyword table; the leftmost match
///   wins, and longer phrases outrank their prefixes (`merge force` beats
///   `merge`).
/// - Text on other lines never triggers a command.
pub fn parse_comment(text: &str, bot_name: &str) -> Option<Command> {
    text.lines()
        .find_map(|line| parse_line(line, bot_name))
}

/// Parses a single comment line.
fn parse_line(line: &str, bot_name: &str) -> Option<Command> {
    let rest = line.strip_prefix('@')?.strip_prefix(bot_name)?;

    // "@bunnybotx merge" is addressed to somebody else.
    if rest
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }

    let tokens: Vec<&str> = rest
        .split_ascii_whitespace()
        .map(strip_punctuation)
        .collect();
    (0..tokens.len()).find_map(|i| lookup_keyword(&tokens[i..]))
}

/// Strips non-alphanumeric characters from both ends of a token, so
/// "merge!" and "(merge)" still name the keyword.
fn strip_punctuation(token: &str) -> &str {
    token
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
}
