use super::ast::{Command, Node, Redirection};
use super::lexer::{Token, TokenKind};
use super::redirect::{self, HeredocReader};
use crate::shell::error::ParseError;

/// Most operators and parentheses accepted on one line.
pub const MAX_NESTING: usize = 256;

/// Recursive-descent parser over an already lexed (and expanded) line.
///
/// ```text
/// command        := and_or
/// and_or         := pipeline ( ("&&" | "||") pipeline )*
/// pipeline       := unit ( "|" unit )*
/// unit           := "(" and_or ")" | simple_command
/// simple_command := (WORD | redirection)+      -- at least one WORD
/// redirection    := ("<" | ">" | ">>" | "<<") WORD
/// ```
///
/// Here-document bodies are read only after the whole line parsed.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    pub fn parse(mut self, heredocs: &mut dyn HeredocReader) -> Result<Node, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::EmptyInput);
        }
        self.check_nesting()?;

        let mut node = self.parse_and_or()?;
        if let Some(token) = self.peek() {
            return Err(self.unexpected(token));
        }
        redirect::read_bodies(&mut node, heredocs)?;
        Ok(node)
    }

    // Every `|`, `&&`, `||` and `(` adds at most one level to the tree, so
    // capping their count bounds the depth of every later tree walk.
    fn check_nesting(&self) -> Result<(), ParseError> {
        let mut operators = 0;
        for token in &self.tokens {
            if matches!(
                token.kind,
                TokenKind::Pipe | TokenKind::And | TokenKind::Or | TokenKind::LParen
            ) {
                operators += 1;
                if operators > MAX_NESTING {
                    return Err(ParseError::TooDeep { pos: token.pos });
                }
            }
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.current).cloned();
        if token.is_some() {
            self.current += 1;
        }
        token
    }

    fn unexpected(&self, token: &Token) -> ParseError {
        match token.kind {
            TokenKind::RParen if self.depth == 0 => ParseError::UnmatchedParen { pos: token.pos },
            TokenKind::Ampersand => ParseError::Background { pos: token.pos },
            _ => ParseError::UnexpectedToken {
                token: token.text.clone(),
                pos: token.pos,
            },
        }
    }

    fn parse_and_or(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_pipeline()?;

        loop {
            match self.peek_kind() {
                Some(TokenKind::And) => {
                    self.next_token();
                    let right = self.parse_pipeline()?;
                    left = Node::and(left, right);
                }
                Some(TokenKind::Or) => {
                    self.next_token();
                    let right = self.parse_pipeline()?;
                    left = Node::or(left, right);
                }
                _ => return Ok(left),
            }
        }
    }

    // `a | b | c` nests to the right: Pipe{a, Pipe{b, c}}.
    fn parse_pipeline(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_unit()?;

        if self.peek_kind() == Some(TokenKind::Pipe) {
            self.next_token();
            let right = self.parse_pipeline()?;
            return Ok(Node::pipe(left, right));
        }
        Ok(left)
    }

    fn parse_unit(&mut self) -> Result<Node, ParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.end_of_input());
        };

        match token.kind {
            TokenKind::LParen => self.parse_subshell(),
            TokenKind::Word => self.parse_simple_command(),
            kind if kind.is_redirection() => self.parse_simple_command(),
            _ => Err(self.unexpected(&token)),
        }
    }

    fn parse_subshell(&mut self) -> Result<Node, ParseError> {
        let Some(open) = self.next_token() else {
            return Err(self.end_of_input());
        };

        match self.peek_kind() {
            Some(TokenKind::RParen) => return Err(ParseError::EmptyParens { pos: open.pos }),
            None => return Err(ParseError::UnclosedParen { pos: open.pos }),
            _ => {}
        }

        self.depth += 1;
        let body = self.parse_and_or()?;
        self.depth -= 1;

        match self.next_token() {
            Some(token) if token.kind == TokenKind::RParen => Ok(Node::subshell(body)),
            Some(token) => Err(self.unexpected(&token)),
            None => Err(ParseError::UnclosedParen { pos: open.pos }),
        }
    }

    fn parse_simple_command(&mut self) -> Result<Node, ParseError> {
        let start = self.peek().map(|t| t.pos).unwrap_or_default();
        let mut command = Command::default();

        while let Some(token) = self.peek().cloned() {
            match token.kind {
                TokenKind::Word => {
                    command.argv.push(token.text);
                    self.next_token();
                }
                kind if kind.is_redirection() => {
                    self.next_token();
                    let redirection = self.parse_redirection(token)?;
                    command.redirections.push(redirection);
                }
                _ => break,
            }
        }

        if command.argv.is_empty() {
            return Err(ParseError::MissingCommand { pos: start });
        }
        Ok(Node::Simple(command))
    }

    fn parse_redirection(&mut self, op: Token) -> Result<Redirection, ParseError> {
        match self.next_token() {
            Some(target) if target.kind == TokenKind::Word => redirect::collect(&op, target),
            Some(token) => Err(self.unexpected(&token)),
            None => Err(ParseError::MissingRedirectTarget {
                op: op.text,
                pos: op.pos,
            }),
        }
    }

    fn end_of_input(&self) -> ParseError {
        let after = self
            .current
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.text.clone())
            .unwrap_or_default();
        ParseError::UnexpectedEnd { after }
    }
}
