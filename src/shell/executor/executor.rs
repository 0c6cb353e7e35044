use std::ffi::CString;
use std::fmt::Display;
use std::io::{self, Write};
use std::os::fd::RawFd;

use log::{debug, error};
use nix::errno::Errno;
use nix::unistd::{close, dup2, execvp, fork, getpid, setpgid, ForkResult, Pid};

use super::pipeline::{collect_stages, PipeArena, StageFds};
use super::redirect::{apply_redirections, SavedStreams};
use crate::shell::builtins::{BuiltinFn, BuiltinRegistry};
use crate::shell::error::{ExecError, SystemResourceError};
use crate::shell::job_manager::waitpidx;
use crate::shell::parser::ast::{Command, Node};
use crate::shell::signals::{self, ForegroundGuard};
use crate::shell::state::ShellState;

fn report(err: impl Display) {
    let _ = writeln!(io::stderr(), "mish: {}", err);
}

/// Leaves a forked child without running the parent's destructors or
/// atexit handlers.
fn exit_child(status: i32) -> ! {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    unsafe { libc::_exit(status) }
}

/// Replaces the process image. Only returns on failure.
fn exec_program(argv: &[String]) -> ExecError {
    let Some(name) = argv.first() else {
        return ExecError::NotFound(String::new());
    };
    let args: Result<Vec<CString>, _> = argv.iter().map(|a| CString::new(a.as_bytes())).collect();
    let Ok(args) = args else {
        return ExecError::InvalidArgument(name.clone());
    };
    match execvp(&args[0], &args) {
        Ok(never) => match never {},
        Err(errno) => ExecError::from_errno(name, errno),
    }
}

pub struct Executor {
    builtins: BuiltinRegistry,
    /// Whether new pipelines get their own process group. Only interactive
    /// shells use job control, and never inside subshell children.
    job_control: bool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            builtins: BuiltinRegistry::default(),
            job_control: true,
        }
    }

    /// Evaluates one parsed line and records its status in `state`.
    pub fn execute(&mut self, node: &Node, state: &mut ShellState) -> Result<i32, SystemResourceError> {
        self.job_control = state.interactive;
        let result = self.eval(node, state);
        state.last_status = match &result {
            Ok(status) => *status,
            Err(_) => 1,
        };
        result
    }

    fn eval(&mut self, node: &Node, state: &mut ShellState) -> Result<i32, SystemResourceError> {
        match node {
            Node::And { left, right } => {
                let status = self.eval(left, state)?;
                if status != 0 || state.exit_request().is_some() {
                    return Ok(status);
                }
                self.eval(right, state)
            }
            Node::Or { left, right } => {
                let status = self.eval(left, state)?;
                if status == 0 || state.exit_request().is_some() {
                    return Ok(status);
                }
                self.eval(right, state)
            }
            Node::Simple(command) => match self.lookup_builtin(command) {
                Some(builtin) => Ok(self.run_builtin(command, builtin, state)),
                None => self.run_pipeline(node, state),
            },
            Node::Pipe { .. } | Node::Subshell(_) => self.run_pipeline(node, state),
        }
    }

    fn lookup_builtin(&self, command: &Command) -> Option<BuiltinFn> {
        command
            .argv
            .first()
            .and_then(|name| self.builtins.lookup(name))
    }

    /// Runs a standalone builtin inside the shell so it can change the
    /// shell's own state. Redirected streams are restored afterwards.
    fn run_builtin(&self, command: &Command, builtin: BuiltinFn, state: &mut ShellState) -> i32 {
        debug!("执行内建命令: {}", shell_words::join(&command.argv));
        if command.redirections.is_empty() {
            return builtin(&command.argv, state);
        }

        let _ = io::stdout().flush();
        let _saved = match SavedStreams::save(&command.redirections) {
            Ok(saved) => saved,
            Err(e) => {
                report(e);
                return 1;
            }
        };
        if let Err(e) = apply_redirections(&command.redirections) {
            report(e);
            return 1;
        }
        builtin(&command.argv, state)
    }

    /// Forks every stage of `node`, wires the pipes between them and waits
    /// for the whole job. A single command or subshell is a one-stage pipeline.
    fn run_pipeline(&mut self, node: &Node, state: &mut ShellState) -> Result<i32, SystemResourceError> {
        let stages = collect_stages(node);
        let arena = PipeArena::open(stages.len())?;
        debug!("启动管道: {} 个阶段, {} 个管道", stages.len(), arena.pipe_count());
        let arena_fds = arena.raw_fds();
        let terminal = state.interactive && self.job_control;

        // Buffered output must not be duplicated into the children.
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let mut pids: Vec<Pid> = Vec::with_capacity(stages.len());
        let mut pgid: Option<Pid> = None;
        let mut fork_error = None;

        for (index, stage) in stages.iter().enumerate() {
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let fds = arena.stage_fds(index);
                    self.run_stage(stage, fds, &arena_fds, pgid, terminal, state)
                }
                Ok(ForkResult::Parent { child }) => {
                    if self.job_control {
                        let group = *pgid.get_or_insert(child);
                        // The child does the same; whichever runs first wins.
                        if let Err(e) = setpgid(child, group) {
                            debug!("setpgid({}, {}) from parent: {}", child, group, e);
                        }
                    }
                    pids.push(child);
                }
                Err(e) => {
                    error!("fork failed after {} of {} stages: {}", pids.len(), stages.len(), e);
                    fork_error = Some(SystemResourceError::Fork(e));
                    break;
                }
            }
        }
        drop(arena);

        let Some(&first) = pids.first() else {
            return Err(fork_error.unwrap_or(SystemResourceError::Fork(Errno::EAGAIN)));
        };
        let pgid = pgid.unwrap_or(first);
        let command = node.to_string();
        debug!("等待前台任务 {} (pgid {}): {}", pids.len(), pgid, command);

        let status = if self.job_control {
            let _guard = ForegroundGuard::enter(pgid, terminal);
            state.jobs.wait_fg_job(pgid, &pids, &command)
        } else {
            let mut status = 0;
            for pid in &pids {
                status = waitpidx(*pid, true).status();
            }
            status
        };

        match fork_error {
            Some(e) => Err(e),
            None => Ok(status),
        }
    }

    /// Body of a forked stage. Never returns.
    fn run_stage(
        &mut self,
        stage: &Node,
        fds: StageFds,
        arena_fds: &[RawFd],
        pgid: Option<Pid>,
        terminal: bool,
        state: &mut ShellState,
    ) -> ! {
        if self.job_control {
            let pid = getpid();
            let group = pgid.unwrap_or(pid);
            let _ = setpgid(pid, group);
            // Still ignoring SIGTTOU here, so this cannot stop us.
            if terminal {
                let _ = signals::give_terminal_to(group);
            }
        }
        signals::reset_for_child();

        for (fd, stream) in [(fds.stdin, libc::STDIN_FILENO), (fds.stdout, libc::STDOUT_FILENO)] {
            if let Some(fd) = fd {
                if let Err(e) = dup2(fd, stream) {
                    report(format!("cannot bind pipe to fd {}: {}", stream, e));
                    exit_child(1);
                }
            }
        }
        for fd in arena_fds {
            let _ = close(*fd);
        }

        let status = match stage {
            Node::Simple(command) => self.exec_simple(command, state),
            body => {
                self.job_control = false;
                let body = match body {
                    Node::Subshell(inner) => inner.as_ref(),
                    other => other,
                };
                match self.eval(body, state) {
                    Ok(status) => status,
                    Err(e) => {
                        report(e);
                        1
                    }
                }
            }
        };
        exit_child(status)
    }

    /// Applies redirections and runs a builtin or replaces the image.
    fn exec_simple(&self, command: &Command, state: &mut ShellState) -> i32 {
        if let Err(e) = apply_redirections(&command.redirections) {
            report(e);
            return 1;
        }
        if let Some(builtin) = self.lookup_builtin(command) {
            return builtin(&command.argv, state);
        }
        let err = exec_program(&command.argv);
        report(&err);
        err.status()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::env;
    use std::fs;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::path::Path;

    use super::*;
    use crate::shell::expand::Expander;
    use crate::shell::parser::lexer::Lexer;
    use crate::shell::parser::Parser;
    use crate::shell::test_support;

    fn run_with(line: &str, heredoc: &[&str], state: &mut ShellState) -> i32 {
        let tokens = Lexer::new(line).tokenize().unwrap();
        let tokens = Expander::new().expand_tokens(tokens, state);
        let mut lines: VecDeque<String> = heredoc.iter().map(|l| l.to_string()).collect();
        let node = Parser::new(tokens).parse(&mut lines).unwrap();
        Executor::new().execute(&node, state).unwrap()
    }

    fn run(line: &str) -> i32 {
        run_with(line, &[], &mut ShellState::new(false))
    }

    fn in_dir(dir: &Path, name: &str) -> String {
        dir.join(name).display().to_string()
    }

    #[test]
    fn exit_statuses_of_simple_commands() {
        let _lock = test_support::lock();
        assert_eq!(run("/bin/true"), 0);
        assert_eq!(run("/bin/false"), 1);
        assert_eq!(run("/bin/sh -c 'exit 7'"), 7);
    }

    #[test]
    fn pipeline_status_is_last_stage() {
        let _lock = test_support::lock();
        assert_eq!(run("/bin/false | /bin/true"), 0);
        assert_eq!(run("/bin/true | /bin/false"), 1);
    }

    #[test]
    fn and_or_short_circuit() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let a = in_dir(dir.path(), "a");
        let b = in_dir(dir.path(), "b");
        let c = in_dir(dir.path(), "c");

        assert_eq!(run(&format!("/bin/false && /usr/bin/touch {a}")), 1);
        assert!(!Path::new(&a).exists());
        assert_eq!(run(&format!("/bin/true || /usr/bin/touch {b}")), 0);
        assert!(!Path::new(&b).exists());
        assert_eq!(run(&format!("/bin/false || /usr/bin/touch {c}")), 0);
        assert!(Path::new(&c).exists());
    }

    #[test]
    fn exit_stops_the_rest_of_the_line() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let marker = in_dir(dir.path(), "marker");
        let mut state = ShellState::new(false);
        let status = run_with(&format!("exit 4 || /usr/bin/touch {marker}"), &[], &mut state);
        assert_eq!(status, 4);
        assert_eq!(state.exit_request(), Some(4));
        assert_eq!(state.last_status, 4);
        assert!(!Path::new(&marker).exists());
    }

    #[test]
    fn subshell_pipeline_then_and() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let marker = in_dir(dir.path(), "done");
        let line = format!("(/bin/echo hi | /bin/cat > /dev/null) && /usr/bin/touch {marker}");
        assert_eq!(run(&line), 0);
        assert!(Path::new(&marker).exists());
    }

    #[test]
    fn output_redirections() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let out = in_dir(dir.path(), "out");
        let first = in_dir(dir.path(), "first");
        let second = in_dir(dir.path(), "second");

        assert_eq!(run(&format!("/bin/echo one > {out}")), 0);
        assert_eq!(run(&format!("/bin/echo two >> {out}")), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "one\ntwo\n");

        assert_eq!(run(&format!("/bin/echo last > {first} > {second}")), 0);
        assert_eq!(fs::read_to_string(&first).unwrap(), "");
        assert_eq!(fs::read_to_string(&second).unwrap(), "last\n");
    }

    #[test]
    fn input_redirection_and_missing_file() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let input = in_dir(dir.path(), "in");
        let out = in_dir(dir.path(), "out");
        fs::write(&input, "b\na\n").unwrap();

        assert_eq!(run(&format!("/usr/bin/sort < {input} > {out}")), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "a\nb\n");
        assert_eq!(run(&format!("/bin/cat < {}", in_dir(dir.path(), "missing"))), 1);
    }

    #[test]
    fn heredoc_feeds_stdin() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let out = in_dir(dir.path(), "out");
        let mut state = ShellState::new(false);
        let status = run_with(
            &format!("/bin/cat << EOF > {out}"),
            &["first line", "  second", "EOF", "after"],
            &mut state,
        );
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "first line\n  second\n");
    }

    #[test]
    fn missing_and_non_executable_commands() {
        let _lock = test_support::lock();
        assert_eq!(run("mish-definitely-not-a-command"), 127);
        assert_eq!(run("/no/such/mish/binary"), 127);

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(run(&script.display().to_string()), 126);
    }

    #[test]
    fn killed_child_reports_128_plus_signal() {
        let _lock = test_support::lock();
        assert_eq!(run("/bin/sh -c 'kill -TERM $$'"), 143);
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let out = in_dir(dir.path(), "count");
        let line = format!("/usr/bin/seq 1 200000 | /bin/cat | /usr/bin/wc -l > {out}");
        assert_eq!(run(&line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "200000");
    }

    #[test]
    fn pipelines_leak_no_descriptors() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let out = in_dir(dir.path(), "out");
        let before = test_support::open_fds();
        assert_eq!(run(&format!("/bin/echo a | /bin/cat | /bin/cat > {out}")), 0);
        assert_eq!(test_support::open_fds(), before);
        assert_eq!(fs::read_to_string(&out).unwrap(), "a\n");
    }

    #[test]
    fn children_cannot_change_shell_directory() {
        let _lock = test_support::lock();
        let cwd = env::current_dir().unwrap();
        assert_eq!(run("(cd /)"), 0);
        assert_eq!(run("cd / | /bin/true"), 0);
        assert_eq!(env::current_dir().unwrap(), cwd);
    }

    #[test]
    fn exit_in_subshell_only_sets_status() {
        let _lock = test_support::lock();
        let mut state = ShellState::new(false);
        assert_eq!(run_with("(exit 3)", &[], &mut state), 3);
        assert_eq!(state.exit_request(), None);
        assert_eq!(state.last_status, 3);
    }

    #[test]
    fn builtin_redirection_restores_stdout() {
        let _lock = test_support::lock();
        let dir = tempfile::tempdir().unwrap();
        let out = in_dir(dir.path(), "pwd");
        let before = fs::metadata("/proc/self/fd/1").unwrap();

        assert_eq!(run(&format!("pwd > {out}")), 0);

        let after = fs::metadata("/proc/self/fd/1").unwrap();
        assert_eq!((before.dev(), before.ino()), (after.dev(), after.ino()));
        let cwd = env::current_dir().unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), format!("{}\n", cwd.display()));
    }

    #[test]
    fn non_interactive_children_share_the_shell_group() {
        let _lock = test_support::lock();
        let group = nix::unistd::getpgrp();
        let check = format!("/bin/sh -c 'test \"$(cut -d\" \" -f5 /proc/$$/stat)\" = {group}'");
        let mut state = ShellState::new(false);
        assert_eq!(run_with(&check, &[], &mut state), 0);
        assert_eq!(run_with(&format!("/bin/true | {check}"), &[], &mut state), 0);
        assert_eq!(run_with(&format!("({check})"), &[], &mut state), 0);
        assert!(state.jobs.get_jobs().is_empty());
    }

    #[test]
    fn pipe_exhaustion_is_a_resource_error() {
        use nix::sys::resource::{getrlimit, setrlimit, Resource};

        let _lock = test_support::lock();
        let tokens = Lexer::new("/bin/true | /bin/true | /bin/true").tokenize().unwrap();
        let node = Parser::new(tokens).parse(&mut VecDeque::new()).unwrap();
        let mut state = ShellState::new(false);
        let before = test_support::open_fds();

        // Only fds 0-2 fit under the limit, and they are taken.
        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
        setrlimit(Resource::RLIMIT_NOFILE, 3, hard).unwrap();
        let result = Executor::new().execute(&node, &mut state);
        setrlimit(Resource::RLIMIT_NOFILE, soft, hard).unwrap();

        assert!(matches!(result, Err(SystemResourceError::Pipe(_))));
        assert_eq!(state.last_status, 1);
        assert_eq!(test_support::open_fds(), before);
    }

    #[test]
    fn builtin_redirection_failure_is_reported() {
        let _lock = test_support::lock();
        assert_eq!(run("pwd > /no/such/mish/dir/file"), 1);
    }
}
