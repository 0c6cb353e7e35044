use super::job_manager::JobManager;

/// Interactive state carried from one read-loop iteration to the next.
///
/// Created once at startup and threaded through the loop; the executor
/// updates `last_status` at the end of every top-level evaluation.
pub struct ShellState {
    pub last_status: i32,
    pub interactive: bool,
    pub jobs: JobManager,
    exit_request: Option<i32>,
}

impl ShellState {
    pub fn new(interactive: bool) -> Self {
        Self {
            last_status: 0,
            interactive,
            jobs: JobManager::new(),
            exit_request: None,
        }
    }

    pub fn request_exit(&mut self, status: i32) {
        self.exit_request = Some(status);
    }

    pub fn exit_request(&self) -> Option<i32> {
        self.exit_request
    }
}
