use std::fmt;

/// Command tree for one input line. Built by the parser, consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Pipe { left: Box<Node>, right: Box<Node> },
    And { left: Box<Node>, right: Box<Node> },
    Or { left: Box<Node>, right: Box<Node> },
    Simple(Command),
    Subshell(Box<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// Never empty; `argv[0]` is the program name.
    pub argv: Vec<String>,
    pub redirections: Vec<Redirection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirection {
    Input(String),
    Output(String),
    Append(String),
    HereDoc { delimiter: String, body: String },
}

impl Redirection {
    /// The standard stream this redirection rebinds.
    pub fn stream(&self) -> i32 {
        match self {
            Redirection::Input(_) | Redirection::HereDoc { .. } => libc::STDIN_FILENO,
            Redirection::Output(_) | Redirection::Append(_) => libc::STDOUT_FILENO,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Redirection::Input(path) | Redirection::Output(path) | Redirection::Append(path) => {
                path
            }
            Redirection::HereDoc { delimiter, .. } => delimiter,
        }
    }
}

impl Node {
    pub fn pipe(left: Node, right: Node) -> Self {
        Node::Pipe {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Node, right: Node) -> Self {
        Node::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Node, right: Node) -> Self {
        Node::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn subshell(body: Node) -> Self {
        Node::Subshell(Box::new(body))
    }

    pub fn simple<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        Node::Simple(Command {
            argv: argv.into_iter().map(Into::into).collect(),
            redirections: Vec::new(),
        })
    }

    /// Number of simple commands in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Node::Pipe { left, right } | Node::And { left, right } | Node::Or { left, right } => {
                left.leaf_count() + right.leaf_count()
            }
            Node::Subshell(body) => body.leaf_count(),
            Node::Simple(_) => 1,
        }
    }

    pub fn pipe_count(&self) -> usize {
        match self {
            Node::Pipe { left, right } => 1 + left.pipe_count() + right.pipe_count(),
            Node::And { left, right } | Node::Or { left, right } => {
                left.pipe_count() + right.pipe_count()
            }
            Node::Subshell(body) => body.pipe_count(),
            Node::Simple(_) => 0,
        }
    }
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redirection::Input(path) => write!(f, "< {}", shell_words::quote(path)),
            Redirection::Output(path) => write!(f, "> {}", shell_words::quote(path)),
            Redirection::Append(path) => write!(f, ">> {}", shell_words::quote(path)),
            Redirection::HereDoc { delimiter, .. } => {
                write!(f, "<< {}", shell_words::quote(delimiter))
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_words::join(&self.argv))?;
        for redirection in &self.redirections {
            write!(f, " {redirection}")?;
        }
        Ok(())
    }
}

// Renders the line back in shell syntax, used for job listings and logs.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Pipe { left, right } => write!(f, "{left} | {right}"),
            Node::And { left, right } => write!(f, "{left} && {right}"),
            Node::Or { left, right } => write!(f, "{left} || {right}"),
            Node::Simple(command) => write!(f, "{command}"),
            Node::Subshell(body) => write!(f, "({body})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_leaves_and_pipes() {
        let tree = Node::and(
            Node::subshell(Node::pipe(Node::simple(["a"]), Node::simple(["b"]))),
            Node::pipe(
                Node::simple(["c"]),
                Node::pipe(Node::simple(["d"]), Node::simple(["e"])),
            ),
        );
        assert_eq!(tree.leaf_count(), 5);
        assert_eq!(tree.pipe_count(), 3);
    }

    #[test]
    fn display_round_trips_syntax() {
        let mut cmd = Command {
            argv: vec!["grep".into(), "a b".into()],
            redirections: vec![Redirection::Input("in.txt".into())],
        };
        cmd.redirections.push(Redirection::Append("out".into()));
        let tree = Node::or(
            Node::subshell(Node::pipe(Node::Simple(cmd), Node::simple(["wc", "-l"]))),
            Node::simple(["true"]),
        );
        assert_eq!(tree.to_string(), "(grep 'a b' < in.txt >> out | wc -l) || true");
    }

    #[test]
    fn redirection_streams() {
        assert_eq!(Redirection::Input("f".into()).stream(), 0);
        assert_eq!(
            Redirection::HereDoc {
                delimiter: "EOF".into(),
                body: String::new()
            }
            .stream(),
            0
        );
        assert_eq!(Redirection::Output("f".into()).stream(), 1);
        assert_eq!(Redirection::Append("f".into()).stream(), 1);
    }
}
