use std::env;
use std::iter::Peekable;
use std::str::Chars;

use super::parser::lexer::{Token, TokenKind};
use super::state::ShellState;

/// Default word expansion applied between lexing and parsing: quote
/// removal, `$NAME` / `${NAME}` / `$?` outside single quotes, and a
/// leading unquoted `~`.
#[derive(Default)]
pub struct Expander;

impl Expander {
    pub fn new() -> Self {
        Self
    }

    pub fn expand_tokens(&self, tokens: Vec<Token>, state: &ShellState) -> Vec<Token> {
        tokens
            .into_iter()
            .map(|token| match token.kind {
                TokenKind::Word => Token {
                    text: self.expand_word(&token.text, state),
                    ..token
                },
                _ => token,
            })
            .collect()
    }

    pub fn expand_word(&self, word: &str, state: &ShellState) -> String {
        let mut result = String::new();
        let rest = if word == "~" || word.starts_with("~/") {
            result.push_str(&shellexpand::tilde("~"));
            &word[1..]
        } else {
            word
        };

        let mut chars = rest.chars().peekable();
        let mut in_double = false;

        while let Some(c) = chars.next() {
            match c {
                '\'' if !in_double => {
                    for quoted in chars.by_ref() {
                        if quoted == '\'' {
                            break;
                        }
                        result.push(quoted);
                    }
                }
                '"' => in_double = !in_double,
                '\\' => match chars.next() {
                    Some(escaped) if in_double && !matches!(escaped, '$' | '`' | '"' | '\\') => {
                        result.push('\\');
                        result.push(escaped);
                    }
                    Some(escaped) => result.push(escaped),
                    None => result.push('\\'),
                },
                '$' => self.expand_parameter(&mut chars, state, &mut result),
                c => result.push(c),
            }
        }
        result
    }

    fn expand_parameter(&self, chars: &mut Peekable<Chars>, state: &ShellState, out: &mut String) {
        match chars.peek() {
            Some('?') => {
                chars.next();
                out.push_str(&state.last_status.to_string());
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&env::var(&name).unwrap_or_default());
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some(c) if c.is_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::test_support;

    fn expand(word: &str) -> String {
        Expander::new().expand_word(word, &ShellState::new(false))
    }

    #[test]
    fn removes_quotes() {
        assert_eq!(expand(r#""hello world""#), "hello world");
        assert_eq!(expand("'a && b'"), "a && b");
        assert_eq!(expand(r#"x"y z"w"#), "xy zw");
        assert_eq!(expand(r"a\|b"), "a|b");
        assert_eq!(expand(r#""a\"b\n""#), r#"a"b\n"#);
    }

    #[test]
    fn expands_variables_outside_single_quotes() {
        let _lock = test_support::lock();
        env::set_var("MISH_EXPAND_TEST_VAR", "value");
        assert_eq!(expand("$MISH_EXPAND_TEST_VAR"), "value");
        assert_eq!(expand("${MISH_EXPAND_TEST_VAR}s"), "values");
        assert_eq!(expand(r#""[$MISH_EXPAND_TEST_VAR]""#), "[value]");
        assert_eq!(expand("'$MISH_EXPAND_TEST_VAR'"), "$MISH_EXPAND_TEST_VAR");
        assert_eq!(expand(r"\$MISH_EXPAND_TEST_VAR"), "$MISH_EXPAND_TEST_VAR");
        assert_eq!(expand("$MISH_EXPAND_TEST_UNSET_VAR"), "");
        assert_eq!(expand("cost$"), "cost$");
        assert_eq!(expand("$1"), "$1");
    }

    #[test]
    fn expands_last_status() {
        let mut state = ShellState::new(false);
        state.last_status = 42;
        assert_eq!(Expander::new().expand_word("rc=$?", &state), "rc=42");
    }

    #[test]
    fn expands_leading_tilde_only() {
        let _lock = test_support::lock();
        let home = shellexpand::tilde("~").to_string();
        assert_eq!(expand("~"), home);
        assert_eq!(expand("~/bin"), format!("{home}/bin"));
        assert_eq!(expand("a~b"), "a~b");
        assert_eq!(expand("'~'"), "~");
    }

    #[test]
    fn leaves_operators_untouched() {
        let tokens = vec![
            Token::word("'x'", 0),
            Token::new(TokenKind::Pipe, "|", 4),
        ];
        let expanded = Expander::new().expand_tokens(tokens, &ShellState::new(false));
        assert_eq!(expanded[0].text, "x");
        assert_eq!(expanded[1].kind, TokenKind::Pipe);
    }
}
