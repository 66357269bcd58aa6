//! Splits a command line into argv using POSIX shell word rules
//!
//! Only quoting and escaping are interpreted; there is no expansion of
//! variables, globs or substitutions. Containers receive the resulting
//! words directly as their command.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellWordsError {
    #[error("unterminated single quote at offset {0}")]
    UnterminatedSingleQuote(usize),

    #[error("unterminated double quote at offset {0}")]
    UnterminatedDoubleQuote(usize),

    #[error("trailing backslash")]
    TrailingBackslash,
}

pub fn split(input: &str) -> Result<Vec<String>, ShellWordsError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.char_indices();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some((_, '\'')) => break,
                        Some((_, c)) => current.push(c),
                        None => return Err(ShellWordsError::UnterminatedSingleQuote(pos)),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, c @ ('\\' | '"' | '$' | '`'))) => current.push(c),
                            // line continuation
                            Some((_, '\n')) => {}
                            Some((_, c)) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(ShellWordsError::UnterminatedDoubleQuote(pos)),
                        },
                        Some((_, c)) => current.push(c),
                        None => return Err(ShellWordsError::UnterminatedDoubleQuote(pos)),
                    }
                }
            }
            '\\' => match chars.next() {
                Some((_, '\n')) => {}
                Some((_, c)) => {
                    in_word = true;
                    current.push(c);
                }
                None => return Err(ShellWordsError::TrailingBackslash),
            },
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}
