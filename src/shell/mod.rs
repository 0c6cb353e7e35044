pub mod builtins;
pub mod error;
pub mod executor;
pub mod expand;
pub mod job_manager;
pub mod parser;
pub mod readline;
#[allow(clippy::module_inception)]
mod shell;
pub mod signals;
pub mod state;
#[cfg(test)]
pub mod test_support;

pub use shell::Shell;
