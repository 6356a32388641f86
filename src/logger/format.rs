//! Console output with ANSI colors and text wrapping
//!
//! Handles:
//! - Colorized tag and level columns
//! - Text wrapping at word boundaries with aligned continuation lines
//! - Broken pipe handling for piped commands

use super::levels::LogLevel;
use super::sink::{LogRecord, LogSink};
use super::tags::LogTag;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 10;
const LEVEL_WIDTH: usize = 8;
const BRACKET_SPACE_WIDTH: usize = 3;
const TOTAL_PREFIX_WIDTH: usize = TAG_WIDTH + LEVEL_WIDTH + BRACKET_SPACE_WIDTH * 2;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Default sink: colored, aligned lines on stdout
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write(&self, record: &LogRecord) {
        let time = record.timestamp.format("%H:%M:%S").to_string();
        let prefix = format!("{} ", time).dimmed().to_string();

        let base_line = format!(
            "{}[{}] [{}] ",
            prefix,
            format_tag(&record.tag),
            format_level(record.level)
        );

        let base_length = strip_ansi_codes(&base_line).len();
        let available_space = if MAX_LINE_LENGTH > base_length {
            MAX_LINE_LENGTH - base_length
        } else {
            50
        };

        let chunks = wrap_text(&record.message, available_space);
        print_stdout_safe(&format!("{}{}", base_line, chunks[0]));

        if chunks.len() > 1 {
            let continuation_prefix = " ".repeat(time.len() + 1 + TOTAL_PREFIX_WIDTH);
            for chunk in &chunks[1..] {
                print_stdout_safe(&format!("{}{}", continuation_prefix, chunk));
            }
        }
    }

    fn flush(&self) {
        let _ = stdout().flush();
    }
}

fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.bright_white().bold(),
        LogTag::WebSocket => label.bright_cyan().bold(),
        LogTag::Irc => label.bright_green().bold(),
        LogTag::Session => label.bright_magenta().bold(),
        LogTag::RateLimit => label.bright_blue().bold(),
        LogTag::CircuitBreaker => label.bright_red().bold(),
        LogTag::Health => label.green().bold(),
        LogTag::Test => label.blue().bold(),
        LogTag::Other(_) => label.white().bold(),
    }
}

fn format_level(level: LogLevel) -> ColoredString {
    let label = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    match level {
        LogLevel::Error => label.bright_red().bold(),
        LogLevel::Warning => label.bright_yellow().bold(),
        LogLevel::Info => label.white().bold(),
        LogLevel::Debug => label.dimmed(),
        LogLevel::Verbose => label.dimmed(),
    }
}

/// Print to stdout but ignore broken pipe errors
fn print_stdout_safe(message: &str) {
    if let Err(e) = writeln!(stdout(), "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
}

/// Remove ANSI color codes from text
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::new();
    let mut in_escape = false;

    for ch in text.chars() {
        if ch == '\x1b' {
            in_escape = true;
        } else if in_escape && ch == 'm' {
            in_escape = false;
        } else if !in_escape {
            result.push(ch);
        }
    }
    result
}

/// Wrap text at word boundaries, respecting existing newlines
///
/// Words longer than the width are split on character boundaries.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();

    for line in text.split('\n') {
        if line.chars().count() <= max_width {
            result.push(line.to_string());
            continue;
        }

        let mut current = String::new();
        for word in line.split_whitespace() {
            let word_len = word.chars().count();
            let current_len = current.chars().count();

            if word_len > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = word.chars().collect();
                for chunk in chars.chunks(max_width) {
                    result.push(chunk.iter().collect());
                }
            } else if current.is_empty() {
                current = word.to_string();
            } else if current_len + word_len + 1 <= max_width {
                current.push(' ');
                current.push_str(word);
            } else {
                result.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }

    if result.is_empty() {
        result.push(String::new());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_short_line_untouched() {
        assert_eq!(wrap_text("hello world", 40), vec!["hello world".to_string()]);
    }

    #[test]
    fn test_wrap_on_word_boundaries() {
        let wrapped = wrap_text("aaa bbb ccc ddd", 7);
        assert_eq!(wrapped, vec!["aaa bbb", "ccc ddd"]);
    }

    #[test]
    fn test_wrap_breaks_long_word() {
        let wrapped = wrap_text("abcdefghij", 4);
        assert_eq!(wrapped, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_strip_ansi() {
        let colored = "x".red().to_string();
        assert_eq!(strip_ansi_codes(&colored), "x");
    }
}
