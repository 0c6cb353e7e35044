use std::collections::HashMap;
use std::env;
use std::io::{self, Write};

use log::debug;
use nix::sys::signal::{killpg, Signal};
use once_cell::sync::Lazy;

use super::job_manager::Job;
use super::signals::ForegroundGuard;
use super::state::ShellState;
use crate::utils::path::find_file_in_path;

/// A builtin receives its full argv and writes through the process's
/// current standard streams, which the executor has already bound.
pub type BuiltinFn = fn(&[String], &mut ShellState) -> i32;

static DEFAULT_BUILTINS: Lazy<HashMap<&'static str, BuiltinFn>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, BuiltinFn> = HashMap::new();
    table.insert("cd", builtin_cd);
    table.insert("pwd", builtin_pwd);
    table.insert("exit", builtin_exit);
    table.insert("export", builtin_export);
    table.insert("unset", builtin_unset);
    table.insert("type", builtin_type);
    table.insert("jobs", builtin_jobs);
    table.insert("fg", builtin_fg);
    table.insert("bg", builtin_bg);
    table
});

#[derive(Clone)]
pub struct BuiltinRegistry {
    table: HashMap<String, BuiltinFn>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        let mut registry = Self {
            table: HashMap::with_capacity(DEFAULT_BUILTINS.len()),
        };
        for (name, builtin) in DEFAULT_BUILTINS.iter() {
            registry.register(name, *builtin);
        }
        registry
    }
}

impl BuiltinRegistry {
    pub fn lookup(&self, name: &str) -> Option<BuiltinFn> {
        self.table.get(name).copied()
    }

    pub fn register(&mut self, name: &str, builtin: BuiltinFn) {
        self.table.insert(name.to_string(), builtin);
    }
}

fn report(name: &str, message: impl std::fmt::Display) {
    let _ = writeln!(io::stderr(), "mish: {}: {}", name, message);
}

fn builtin_cd(args: &[String], _state: &mut ShellState) -> i32 {
    let target = match args.get(1).map(String::as_str) {
        None => env::var("HOME").unwrap_or_else(|_| "/".to_string()),
        Some("-") => match env::var("OLDPWD") {
            Ok(old) => {
                let _ = writeln!(io::stdout(), "{}", old);
                old
            }
            Err(_) => {
                report("cd", "OLDPWD not set");
                return 1;
            }
        },
        Some(path) => shellexpand::tilde(path).into_owned(),
    };

    let previous = env::current_dir().ok();
    if let Err(e) = env::set_current_dir(&target) {
        report("cd", format!("{}: {}", target, e));
        return 1;
    }
    if let Some(previous) = previous {
        env::set_var("OLDPWD", previous);
    }
    if let Ok(now) = env::current_dir() {
        env::set_var("PWD", now);
    }
    debug!("cd -> {}", target);
    0
}

fn builtin_pwd(_args: &[String], _state: &mut ShellState) -> i32 {
    match env::current_dir() {
        Ok(dir) => {
            let _ = writeln!(io::stdout(), "{}", dir.display());
            0
        }
        Err(e) => {
            report("pwd", e);
            1
        }
    }
}

fn builtin_exit(args: &[String], state: &mut ShellState) -> i32 {
    let status = match args.get(1) {
        None => state.last_status,
        Some(arg) => match arg.parse::<i64>() {
            Ok(code) => (code & 0xff) as i32,
            Err(_) => {
                report("exit", format!("{}: numeric argument required", arg));
                2
            }
        },
    };
    state.request_exit(status);
    status
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn builtin_export(args: &[String], _state: &mut ShellState) -> i32 {
    if args.len() < 2 {
        let mut vars: Vec<(String, String)> = env::vars().collect();
        vars.sort();
        let mut out = io::stdout().lock();
        for (name, value) in vars {
            let _ = writeln!(out, "export {}={}", name, shell_words::quote(&value));
        }
        return 0;
    }

    let mut status = 0;
    for arg in &args[1..] {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (arg.as_str(), None),
        };
        if !is_identifier(name) {
            report("export", format!("`{}': not a valid identifier", arg));
            status = 1;
            continue;
        }
        if let Some(value) = value {
            debug!("设置环境变量: {}={}", name, value);
            env::set_var(name, value);
        }
    }
    status
}

fn builtin_unset(args: &[String], _state: &mut ShellState) -> i32 {
    let mut status = 0;
    for name in &args[1..] {
        if !is_identifier(name) {
            report("unset", format!("`{}': not a valid identifier", name));
            status = 1;
            continue;
        }
        env::remove_var(name);
    }
    status
}

fn builtin_type(args: &[String], _state: &mut ShellState) -> i32 {
    let mut status = 0;
    let mut out = io::stdout().lock();
    for name in &args[1..] {
        if DEFAULT_BUILTINS.contains_key(name.as_str()) {
            let _ = writeln!(out, "{} is a shell builtin", name);
        } else if let Some(path) = find_file_in_path(name, true) {
            let _ = writeln!(out, "{} is {}", name, path.display());
        } else {
            report("type", format!("{}: not found", name));
            status = 1;
        }
    }
    status
}

fn builtin_jobs(_args: &[String], state: &mut ShellState) -> i32 {
    let mut out = io::stdout().lock();
    for job in state.jobs.get_jobs() {
        let _ = writeln!(out, "{}", job);
    }
    0
}

/// Accepts `2` or `%2`; no argument means the current job.
fn job_index(name: &str, args: &[String]) -> Result<Option<usize>, ()> {
    match args.get(1) {
        None => Ok(None),
        Some(arg) => match arg.trim_start_matches('%').parse() {
            Ok(index) => Ok(Some(index)),
            Err(_) => {
                report(name, format!("{}: no such job", arg));
                Err(())
            }
        },
    }
}

fn continue_job(job: &Job) -> bool {
    match killpg(job.pgid, Signal::SIGCONT) {
        Ok(()) => true,
        Err(e) => {
            report("fg", format!("cannot continue job {}: {}", job.index, e));
            false
        }
    }
}

fn builtin_fg(args: &[String], state: &mut ShellState) -> i32 {
    let Ok(index) = job_index("fg", args) else {
        return 1;
    };
    let Some(job) = state.jobs.fg(index) else {
        report("fg", "no such job");
        return 1;
    };

    let _ = writeln!(io::stdout(), "{}", job.command);
    let _guard = ForegroundGuard::enter(job.pgid, state.interactive);
    if !continue_job(&job) {
        return 1;
    }
    state.jobs.wait_fg_job(job.pgid, &job.pids, &job.command)
}

fn builtin_bg(args: &[String], state: &mut ShellState) -> i32 {
    let Ok(index) = job_index("bg", args) else {
        return 1;
    };
    let Some(job) = state.jobs.bg(index) else {
        report("bg", "no such job");
        return 1;
    };
    if !continue_job(&job) {
        return 1;
    }
    let _ = writeln!(io::stdout(), "[{}] {} &", job.index, job.command);
    0
}
