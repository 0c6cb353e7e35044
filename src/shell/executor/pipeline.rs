use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::shell::error::SystemResourceError;
use crate::shell::parser::ast::Node;

/// Flattens a pipe tree into its stages, left to right. Any other node
/// is a single stage.
pub fn collect_stages(node: &Node) -> Vec<&Node> {
    let mut stages = Vec::new();
    push_stages(node, &mut stages);
    stages
}

fn push_stages<'a>(node: &'a Node, stages: &mut Vec<&'a Node>) {
    match node {
        Node::Pipe { left, right } => {
            push_stages(left, stages);
            push_stages(right, stages);
        }
        other => stages.push(other),
    }
}

/// Ends of one stage: where its stdin and stdout come from, if not inherited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageFds {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
}

/// All pipes of one pipeline, opened before any stage is forked.
///
/// Every end is close-on-exec; a child dup2s its own ends onto 0/1 and
/// closes the rest, and the parent drops the whole arena once every
/// stage has been started so readers see end-of-file.
pub struct PipeArena {
    pipes: Vec<(OwnedFd, OwnedFd)>,
}

impl PipeArena {
    /// Opens the `stages - 1` pipes a pipeline of `stages` commands needs.
    pub fn open(stages: usize) -> Result<Self, SystemResourceError> {
        let mut pipes = Vec::with_capacity(stages.saturating_sub(1));
        for _ in 1..stages {
            // On failure the pipes opened so far are closed on drop.
            pipes.push(pipe2(OFlag::O_CLOEXEC).map_err(SystemResourceError::Pipe)?);
        }
        Ok(Self { pipes })
    }

    pub fn stage_fds(&self, index: usize) -> StageFds {
        let stdin = index
            .checked_sub(1)
            .and_then(|prev| self.pipes.get(prev))
            .map(|(read, _)| read.as_raw_fd());
        let stdout = self.pipes.get(index).map(|(_, write)| write.as_raw_fd());
        StageFds { stdin, stdout }
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.pipes
            .iter()
            .flat_map(|(read, write)| [read.as_raw_fd(), write.as_raw_fd()])
            .collect()
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shell::test_support;

    #[test]
    fn stages_come_out_in_order() {
        let node = Node::pipe(
            Node::simple(["a"]),
            Node::pipe(Node::subshell(Node::simple(["b"])), Node::simple(["c"])),
        );
        let stages = collect_stages(&node);
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0], &Node::simple(["a"]));
        assert!(matches!(stages[1], Node::Subshell(_)));
        assert_eq!(stages[2], &Node::simple(["c"]));
        assert_eq!(collect_stages(&Node::simple(["x"])).len(), 1);
    }

    #[test]
    fn arena_wires_neighbours() {
        let _lock = test_support::lock();
        let arena = PipeArena::open(3).unwrap();
        assert_eq!(arena.pipe_count(), 2);
        let fds = arena.raw_fds();
        assert_eq!(fds.len(), 4);

        assert_eq!(arena.stage_fds(0), StageFds { stdin: None, stdout: Some(fds[1]) });
        assert_eq!(
            arena.stage_fds(1),
            StageFds { stdin: Some(fds[0]), stdout: Some(fds[3]) }
        );
        assert_eq!(arena.stage_fds(2), StageFds { stdin: Some(fds[2]), stdout: None });
    }

    #[test]
    fn dropping_arena_closes_every_end() {
        let _lock = test_support::lock();
        let before = test_support::open_fds();
        let arena = PipeArena::open(4).unwrap();
        assert_eq!(test_support::open_fds().len(), before.len() + 6);
        drop(arena);
        assert_eq!(test_support::open_fds(), before);
    }

    #[test]
    fn single_stage_needs_no_pipe() {
        let arena = PipeArena::open(1).unwrap();
        assert_eq!(arena.stage_fds(0), StageFds { stdin: None, stdout: None });
        assert!(arena.raw_fds().is_empty());
    }
}
