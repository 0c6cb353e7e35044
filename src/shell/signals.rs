use std::sync::atomic::{AtomicI32, Ordering};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{getpgrp, getpid, setpgid, Pid};

/// Process group of the running foreground job, 0 when the shell itself is in front.
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);

const FORWARDED: [Signal; 3] = [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGWINCH];
const JOB_CONTROL: [Signal; 3] = [Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];

extern "C" fn forward_to_foreground(sig: libc::c_int) {
    if let Some(pgid) = foreground_pgid() {
        unsafe {
            libc::killpg(pgid.as_raw(), sig);
        }
    }
}

fn set_handler(sig: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    unsafe { sigaction(sig, &action) }.map(drop)
}

/// Interrupt, quit and resize reach the foreground job instead of killing the shell.
pub fn install_handlers() -> nix::Result<()> {
    for sig in FORWARDED {
        set_handler(sig, SigHandler::Handler(forward_to_foreground))?;
    }
    Ok(())
}

/// 忽略 Ctrl-Z 以及后台读写终端产生的信号
pub fn ignore_job_control_signals() -> nix::Result<()> {
    for sig in JOB_CONTROL {
        set_handler(sig, SigHandler::SigIgn)?;
    }
    Ok(())
}

/// Called in a forked child before it runs anything: every disposition the
/// shell changed goes back to the default, SIGPIPE included.
pub fn reset_for_child() {
    for sig in FORWARDED.into_iter().chain(JOB_CONTROL).chain([Signal::SIGPIPE]) {
        let _ = set_handler(sig, SigHandler::SigDfl);
    }
}

pub fn give_terminal_to(pgid: Pid) -> nix::Result<()> {
    Errno::result(unsafe { libc::tcsetpgrp(libc::STDIN_FILENO, pgid.as_raw()) }).map(drop)
}

fn terminal_owner() -> nix::Result<Pid> {
    Errno::result(unsafe { libc::tcgetpgrp(libc::STDIN_FILENO) }).map(Pid::from_raw)
}

/// Makes the interactive shell the leader of its own process group and
/// the owner of the terminal.
pub fn take_terminal() -> nix::Result<Pid> {
    // Started in the background: wait until we are brought to the front.
    loop {
        let owner = terminal_owner()?;
        if owner == getpgrp() {
            break;
        }
        killpg(getpgrp(), Signal::SIGTTIN)?;
    }

    ignore_job_control_signals()?;

    let pid = getpid();
    if let Err(e) = setpgid(pid, pid) {
        // A session leader cannot change its group; it already leads one.
        if e != Errno::EPERM {
            return Err(e);
        }
    }
    give_terminal_to(getpgrp())?;
    debug!("shell owns the terminal with process group {}", getpgrp());
    Ok(getpgrp())
}

/// Marks `pgid` as the foreground job and, with a terminal, hands it over.
pub fn set_foreground(pgid: Pid, terminal: bool) {
    FOREGROUND_PGID.store(pgid.as_raw(), Ordering::SeqCst);
    if terminal {
        if let Err(e) = give_terminal_to(pgid) {
            warn!("cannot give terminal to {}: {}", pgid, e);
        }
    }
}

pub fn restore_shell_foreground(terminal: bool) {
    FOREGROUND_PGID.store(0, Ordering::SeqCst);
    if terminal {
        if let Err(e) = give_terminal_to(getpgrp()) {
            warn!("cannot take terminal back: {}", e);
        }
    }
}

pub fn foreground_pgid() -> Option<Pid> {
    match FOREGROUND_PGID.load(Ordering::SeqCst) {
        pgid if pgid <= 0 => None,
        pgid => Some(Pid::from_raw(pgid)),
    }
}

/// Foreground ownership for the lifetime of one job wait.
pub struct ForegroundGuard {
    terminal: bool,
}

impl ForegroundGuard {
    pub fn enter(pgid: Pid, terminal: bool) -> Self {
        set_foreground(pgid, terminal);
        Self { terminal }
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        restore_shell_foreground(self.terminal);
    }
}
