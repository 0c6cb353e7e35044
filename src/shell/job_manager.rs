use std::fmt;
use std::io::{self, Write};

use log::{debug, error, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::waitpid;
use nix::sys::wait::WaitPidFlag as WF;
use nix::sys::wait::WaitStatus as WS;
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done,
    Killed,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub pgid: Pid,
    /// Processes of the job that have not been reaped yet.
    pub pids: Vec<Pid>,
    pub index: usize,
    pub command: String,
    pub status: JobStatus,
    pub is_current: bool,
    pub is_previous: bool,
}

impl Job {
    fn new(pgid: Pid, pids: Vec<Pid>, index: usize, command: String, status: JobStatus) -> Self {
        Self {
            pgid,
            pids,
            index,
            command,
            status,
            is_current: false,
            is_previous: false,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Done => "done",
            JobStatus::Killed => "killed",
        };
        let mark = if self.is_current {
            "+"
        } else if self.is_previous {
            "-"
        } else {
            " "
        };
        write!(
            f,
            "[{}] {} {} {} {}",
            self.index, mark, self.pgid, status, self.command
        )
    }
}

/// What `waitpid` reported for one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Exited(i32),
    Signaled(Signal),
    Stopped(Signal),
    Continued,
    Running,
    /// The child was already reaped elsewhere.
    Lost,
}

impl ChildState {
    /// Shell exit status: the exit code, or 128 + signal number.
    pub fn status(&self) -> i32 {
        match self {
            ChildState::Exited(code) => *code,
            ChildState::Signaled(sig) | ChildState::Stopped(sig) => 128 + *sig as i32,
            ChildState::Continued | ChildState::Running => 0,
            ChildState::Lost => 1,
        }
    }

    fn is_finished(&self) -> bool {
        matches!(
            self,
            ChildState::Exited(_) | ChildState::Signaled(_) | ChildState::Lost
        )
    }
}

/// Waits for one child. An interrupted wait (EINTR) is retried, so only a
/// real state change of `pid` ends the call.
pub fn waitpidx(pid: Pid, block: bool) -> ChildState {
    let options = if block {
        WF::WUNTRACED
    } else {
        WF::WUNTRACED | WF::WCONTINUED | WF::WNOHANG
    };
    loop {
        match waitpid(pid, Some(options)) {
            Ok(WS::Exited(_, code)) => return ChildState::Exited(code),
            Ok(WS::Signaled(_, sig, _core_dumped)) => return ChildState::Signaled(sig),
            Ok(WS::Stopped(_, sig)) => return ChildState::Stopped(sig),
            Ok(WS::Continued(_)) => return ChildState::Continued,
            Ok(WS::StillAlive) => return ChildState::Running,
            #[allow(unreachable_patterns)]
            Ok(other) => {
                debug!("ignoring wait status {:?} for {}", other, pid);
                if !block {
                    return ChildState::Running;
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                warn!("child {} already reaped", pid);
                return ChildState::Lost;
            }
            Err(e) => {
                error!("waitpid({}) failed: {}", pid, e);
                return ChildState::Lost;
            }
        }
    }
}

#[derive(Default)]
pub struct JobManager {
    jobs: Vec<Job>,
}

impl JobManager {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn get_jobs(&self) -> &[Job] {
        &self.jobs
    }

    fn find_available_index(&self) -> usize {
        let mut index = 1;
        while self.jobs.iter().any(|job| job.index == index) {
            index += 1;
        }
        index
    }

    pub fn add_job(&mut self, pgid: Pid, pids: Vec<Pid>, command: String, status: JobStatus) -> usize {
        let index = self.find_available_index();
        let job = Job::new(pgid, pids, index, command, status);
        self.jobs.push(job);
        self.update_marks(index);
        index
    }

    pub fn remove_job(&mut self, index: usize) -> Option<Job> {
        let pos = self.jobs.iter().position(|job| job.index == index)?;
        let was_current = self.jobs[pos].is_current;
        let job = self.jobs.remove(pos);

        if was_current && !self.jobs.is_empty() {
            // 上一个任务提升为当前任务
            if let Some(prev_job) = self.jobs.iter_mut().find(|job| job.is_previous) {
                prev_job.is_current = true;
                prev_job.is_previous = false;
            } else {
                let last_idx = self.jobs.len() - 1;
                self.jobs[last_idx].is_current = true;
            }
        }
        Some(job)
    }

    fn resolve(&self, index: Option<usize>) -> Option<usize> {
        match index {
            Some(idx) => self.jobs.iter().find(|job| job.index == idx).map(|j| j.index),
            None => self.jobs.iter().find(|job| job.is_current).map(|j| j.index),
        }
    }

    /// Takes a job out of the table to run it in the foreground.
    pub fn fg(&mut self, index: Option<usize>) -> Option<Job> {
        let index = self.resolve(index)?;
        self.remove_job(index)
    }

    pub fn bg(&mut self, index: Option<usize>) -> Option<Job> {
        let index = self.resolve(index)?;
        let pos = self.jobs.iter().position(|job| job.index == index)?;
        self.jobs[pos].status = JobStatus::Running;
        self.update_marks(index);
        Some(self.jobs[pos].clone())
    }

    fn update_marks(&mut self, current_job_index: usize) {
        for job in self.jobs.iter_mut() {
            if job.index == current_job_index {
                job.is_current = true;
                job.is_previous = false;
            } else if job.is_current {
                job.is_current = false;
                job.is_previous = true;
            } else {
                job.is_previous = false;
            }
        }
    }

    /// Blocks until every process of the foreground job has finished or
    /// the job is stopped. Returns the status of the last process; a
    /// stopped job is moved into the table.
    pub fn wait_fg_job(&mut self, pgid: Pid, pids: &[Pid], command: &str) -> i32 {
        let Some(&pid_last) = pids.last() else {
            return 0;
        };

        let mut status = 0;
        let mut pending = Vec::new();
        let mut stop_signal = None;

        for &pid in pids {
            let state = waitpidx(pid, true);
            debug!("child {} -> {:?}", pid, state);
            if let ChildState::Stopped(sig) = state {
                stop_signal = Some(sig);
                pending.push(pid);
            }
            if pid == pid_last {
                status = state.status();
            }
        }

        if let Some(sig) = stop_signal {
            let index = self.add_job(pgid, pending, command.to_string(), JobStatus::Stopped);
            if let Some(job) = self.jobs.iter().find(|job| job.index == index) {
                let _ = writeln!(io::stdout(), "\n{}", job);
            }
            return 128 + sig as i32;
        }
        status
    }

    /// Non-blocking sweep over the table; finished jobs are removed and returned.
    pub fn reap_background(&mut self) -> Vec<Job> {
        let mut finished = Vec::new();

        for job in self.jobs.iter_mut() {
            let mut killed = false;
            job.pids.retain(|&pid| {
                let state = waitpidx(pid, false);
                match state {
                    ChildState::Stopped(_) => job.status = JobStatus::Stopped,
                    ChildState::Continued => job.status = JobStatus::Running,
                    ChildState::Signaled(_) => killed = true,
                    _ => {}
                }
                !state.is_finished()
            });
            if job.pids.is_empty() {
                job.status = if killed {
                    JobStatus::Killed
                } else {
                    JobStatus::Done
                };
                finished.push(job.index);
            }
        }

        finished
            .into_iter()
            .filter_map(|index| self.remove_job(index))
            .collect()
    }
}
