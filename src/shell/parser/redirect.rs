use std::collections::VecDeque;
use std::io;

use log::{debug, warn};

use super::ast::{Node, Redirection};
use super::lexer::{Token, TokenKind};
use crate::shell::error::ParseError;

/// Source of here-document body lines. `Ok(None)` means end of input.
pub trait HeredocReader {
    fn read_heredoc_line(&mut self) -> io::Result<Option<String>>;
}

impl HeredocReader for VecDeque<String> {
    fn read_heredoc_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.pop_front())
    }
}

/// Builds the redirection for `op` applied to `target`. A here-document
/// starts with an empty body; see [`read_bodies`].
pub fn collect(op: &Token, target: Token) -> Result<Redirection, ParseError> {
    let path = target.text;
    let redirection = match op.kind {
        TokenKind::RedirectIn => Redirection::Input(path),
        TokenKind::RedirectOut => Redirection::Output(path),
        TokenKind::RedirectAppend => Redirection::Append(path),
        TokenKind::HereDoc => Redirection::HereDoc {
            delimiter: path,
            body: String::new(),
        },
        _ => {
            return Err(ParseError::UnexpectedToken {
                token: op.text.clone(),
                pos: op.pos,
            })
        }
    };
    Ok(redirection)
}

fn pending_heredocs<'a>(node: &'a mut Node, out: &mut Vec<&'a mut Redirection>) {
    match node {
        Node::Pipe { left, right } | Node::And { left, right } | Node::Or { left, right } => {
            pending_heredocs(left, out);
            pending_heredocs(right, out);
        }
        Node::Subshell(body) => pending_heredocs(body, out),
        Node::Simple(command) => out.extend(
            command
                .redirections
                .iter_mut()
                .filter(|r| matches!(r, Redirection::HereDoc { .. })),
        ),
    }
}

/// Fills every here-document of a parsed line, in source order, from the
/// lines that follow it. Only called once the whole line is known to be
/// valid, so a rejected line never consumes input.
pub fn read_bodies(node: &mut Node, heredocs: &mut dyn HeredocReader) -> Result<(), ParseError> {
    let mut pending = Vec::new();
    pending_heredocs(node, &mut pending);
    for redirection in pending {
        if let Redirection::HereDoc { delimiter, body } = redirection {
            *body = read_body(delimiter, heredocs)?;
        }
    }
    Ok(())
}

fn read_body(delimiter: &str, heredocs: &mut dyn HeredocReader) -> Result<String, ParseError> {
    let mut body = String::new();
    loop {
        match heredocs.read_heredoc_line().map_err(ParseError::HereDocInput)? {
            Some(line) if line == delimiter => break,
            Some(line) => {
                body.push_str(&line);
                body.push('\n');
            }
            None => {
                warn!("here-document delimited by end of input (wanted `{delimiter}`)");
                break;
            }
        }
    }
    debug!("captured here-document `{}` ({} bytes)", delimiter, body.len());
    Ok(body)
}
