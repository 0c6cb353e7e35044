#[allow(clippy::module_inception)]
mod executor;
pub mod pipeline;
pub mod redirect;

pub use executor::Executor;
