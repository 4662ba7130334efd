mod config;
mod engine;
mod handler;
mod job;
mod progress;

pub use config::EngineConfig;
pub use engine::{EngineContext, JobEngine};
pub use handler::{ExtensionHandler, FileExtensionHandler, HandlerRegistry};
pub use job::{Job, JobKind, JobState, JobStatus, Request};
pub use progress::{Progress, ProgressHandle, ProgressObserver, ProgressTracker};

#[cfg(test)]
mod tests;
