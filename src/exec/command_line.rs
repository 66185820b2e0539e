// src/exec/command_line.rs

//! POSIX-shell-style splitting of user-supplied command strings.
//!
//! Rules:
//! - unquoted whitespace separates words
//! - single quotes preserve their contents literally (no escapes)
//! - inside double quotes, backslash escapes `"`, `\`, `$`, backtick and
//!   newline; before anything else it is kept literally
//! - a bare backslash escapes the next character

use std::fmt;

use thiserror::Error;

/// Why a command line could not be split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvalidCause {
    UnbalancedDoubleQuote,
    UnbalancedSingleQuote,
    TrailingBackslash,
}

impl fmt::Display for InvalidCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidCause::UnbalancedDoubleQuote => {
                write!(f, "it contains an unbalanced double quote")
            }
            InvalidCause::UnbalancedSingleQuote => {
                write!(f, "it contains an unbalanced single quote")
            }
            InvalidCause::TrailingBackslash => write!(
                f,
                "it ends with a backslash (backslashes always escape the following character, for a literal backslash, use '\\\\')"
            ),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Command line `{command}` is invalid: {cause}")]
pub struct CommandLineParseError {
    command: String,
    cause: InvalidCause,
}

impl CommandLineParseError {
    fn new(command: &str, cause: InvalidCause) -> Self {
        Self {
            command: command.to_string(),
            cause,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
}

/// Split a command string into words.
pub fn parse_command_line(command: &str) -> Result<Vec<String>, CommandLineParseError> {
    let mut words = Vec::new();
    let mut current = String::new();
    // Distinguishes "no word in progress" from an explicitly empty word
    // such as ''.
    let mut in_word = false;
    let mut mode = Mode::Unquoted;

    let mut chars = command.chars();
    while let Some(c) = chars.next() {
        match mode {
            Mode::Unquoted => match c {
                '\'' => {
                    mode = Mode::SingleQuoted;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::DoubleQuoted;
                    in_word = true;
                }
                '\\' => match chars.next() {
                    Some(next) => {
                        current.push(next);
                        in_word = true;
                    }
                    None => {
                        return Err(CommandLineParseError::new(
                            command,
                            InvalidCause::TrailingBackslash,
                        ))
                    }
                },
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },

            Mode::SingleQuoted => match c {
                '\'' => mode = Mode::Unquoted,
                c => current.push(c),
            },

            Mode::DoubleQuoted => match c {
                '"' => mode = Mode::Unquoted,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`' | '\n')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => {
                        return Err(CommandLineParseError::new(
                            command,
                            InvalidCause::UnbalancedDoubleQuote,
                        ))
                    }
                },
                c => current.push(c),
            },
        }
    }

    match mode {
        Mode::SingleQuoted => Err(CommandLineParseError::new(
            command,
            InvalidCause::UnbalancedSingleQuote,
        )),
        Mode::DoubleQuoted => Err(CommandLineParseError::new(
            command,
            InvalidCause::UnbalancedDoubleQuote,
        )),
        Mode::Unquoted => {
            if in_word {
                words.push(current);
            }
            Ok(words)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_unquoted_whitespace() {
        assert_eq!(
            parse_command_line("echo  hello   world").unwrap(),
            vec!["echo", "hello", "world"]
        );
        assert_eq!(parse_command_line("").unwrap(), Vec::<String>::new());
        assert_eq!(parse_command_line("   ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn single_quotes_preserve_contents_literally() {
        assert_eq!(
            parse_command_line(r#"echo 'hello $USER \n'"#).unwrap(),
            vec!["echo", r#"hello $USER \n"#]
        );
        assert_eq!(parse_command_line("echo ''").unwrap(), vec!["echo", ""]);
    }

    #[test]
    fn double_quotes_allow_selected_escapes() {
        assert_eq!(
            parse_command_line(r#"echo "a \" b \\ c \$ d""#).unwrap(),
            vec!["echo", r#"a " b \ c $ d"#]
        );
        // A backslash before anything else stays literal.
        assert_eq!(
            parse_command_line(r#"echo "a \n b""#).unwrap(),
            vec!["echo", r#"a \n b"#]
        );
    }

    #[test]
    fn bare_backslash_escapes_the_next_character() {
        assert_eq!(
            parse_command_line(r#"echo hello\ world"#).unwrap(),
            vec!["echo", "hello world"]
        );
        assert_eq!(
            parse_command_line(r#"echo \'"#).unwrap(),
            vec!["echo", "'"]
        );
    }

    #[test]
    fn splits_heavily_nested_quoting() {
        let command =
            "sh -c 'echo \"\\\"un'\\''kno\\\"wn\\$\\$\\$'\\'' with \\$\\\"\\$\\$. \\\"zzz\\\"\"'";
        assert_eq!(
            parse_command_line(command).unwrap(),
            vec![
                "sh",
                "-c",
                "echo \"\\\"un'kno\\\"wn\\$\\$\\$' with \\$\\\"\\$\\$. \\\"zzz\\\"\"",
            ]
        );
    }

    #[test]
    fn reports_unbalanced_double_quote() {
        let err = parse_command_line(r#"echo "hello"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command line `echo \"hello` is invalid: it contains an unbalanced double quote"
        );
    }

    #[test]
    fn reports_unbalanced_single_quote() {
        let err = parse_command_line("echo 'hello").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command line `echo 'hello` is invalid: it contains an unbalanced single quote"
        );
    }

    #[test]
    fn reports_trailing_backslash() {
        let err = parse_command_line("echo hello\\").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command line `echo hello\\` is invalid: it ends with a backslash (backslashes always escape the following character, for a literal backslash, use '\\\\')"
        );
    }
}
