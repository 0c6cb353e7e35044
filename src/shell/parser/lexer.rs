use std::iter::Peekable;
use std::str::CharIndices;

use crate::shell::error::LexError;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    Word,
    Pipe,
    And,
    Or,
    LParen,
    RParen,
    RedirectIn,
    RedirectOut,
    RedirectAppend,
    HereDoc,
    Ampersand,
}

impl TokenKind {
    pub fn is_redirection(self) -> bool {
        matches!(
            self,
            TokenKind::RedirectIn
                | TokenKind::RedirectOut
                | TokenKind::RedirectAppend
                | TokenKind::HereDoc
        )
    }
}

/// A lexeme together with the byte offset it starts at in the input line.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, pos: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            pos,
        }
    }

    pub fn word(text: impl Into<String>, pos: usize) -> Self {
        Self::new(TokenKind::Word, text, pos)
    }
}

fn is_operator_char(c: char) -> bool {
    "|&<>()".contains(c)
}

pub struct Lexer<'a> {
    input: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.char_indices().peekable(),
        }
    }

    /// Consumes the whole line.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_whitespace();

        let Some((pos, c)) = self.peek_char() else {
            return Ok(None);
        };

        let token = match c {
            '|' => self.read_operator(pos, '|', TokenKind::Pipe, TokenKind::Or),
            '&' => self.read_operator(pos, '&', TokenKind::Ampersand, TokenKind::And),
            '<' => self.read_operator(pos, '<', TokenKind::RedirectIn, TokenKind::HereDoc),
            '>' => self.read_operator(pos, '>', TokenKind::RedirectOut, TokenKind::RedirectAppend),
            '(' => {
                self.read_char();
                Token::new(TokenKind::LParen, "(", pos)
            }
            ')' => {
                self.read_char();
                Token::new(TokenKind::RParen, ")", pos)
            }
            _ => self.read_word(pos)?,
        };
        Ok(Some(token))
    }

    fn read_char(&mut self) -> Option<(usize, char)> {
        self.input.next()
    }

    fn peek_char(&mut self) -> Option<(usize, char)> {
        self.input.peek().copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some((_, c)) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.read_char();
        }
    }

    // Longest match: a doubled operator character wins over the single one.
    fn read_operator(&mut self, pos: usize, c: char, single: TokenKind, double: TokenKind) -> Token {
        self.read_char();
        if matches!(self.peek_char(), Some((_, next)) if next == c) {
            self.read_char();
            Token::new(double, format!("{c}{c}"), pos)
        } else {
            Token::new(single, c.to_string(), pos)
        }
    }

    fn read_word(&mut self, pos: usize) -> Result<Token, LexError> {
        let mut word = String::new();

        while let Some((_, c)) = self.peek_char() {
            match c {
                c if c.is_whitespace() || is_operator_char(c) => break,
                '\'' | '"' => self.read_quoted(&mut word)?,
                '\\' => {
                    self.read_char();
                    word.push('\\');
                    if let Some((_, escaped)) = self.read_char() {
                        word.push(escaped);
                    }
                }
                c => {
                    self.read_char();
                    word.push(c);
                }
            }
        }

        Ok(Token::word(word, pos))
    }

    /// Copies a quoted region verbatim (quotes included) into `word`.
    fn read_quoted(&mut self, word: &mut String) -> Result<(), LexError> {
        let Some((start, quote)) = self.read_char() else {
            return Ok(());
        };
        word.push(quote);

        loop {
            match self.read_char() {
                None => return Err(LexError::UnterminatedQuote { quote, pos: start }),
                Some((_, c)) if c == quote => {
                    word.push(c);
                    return Ok(());
                }
                Some((_, '\\')) if quote == '"' => {
                    word.push('\\');
                    if let Some((_, escaped)) = self.read_char() {
                        word.push(escaped);
                    }
                }
                Some((_, c)) => word.push(c),
            }
        }
    }
}
