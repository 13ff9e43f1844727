// src/core/mod.rs

/// Data structures shared by every stage: per-host records, nmap artifacts,
/// stage statuses and the final `PipelineReport`.
pub mod models;

/// The individual pipeline stages that talk to external tools and APIs.
pub mod scanner;

/// Human-readable explanations for every issue code the pipeline can raise.
pub mod knowledge_base;

/// Sequential orchestration of the stages.
pub mod pipeline;

/// External process execution behind the `CommandRunner` seam.
pub mod runner;

pub mod target;

/// Report delivery to the automation platform's webhook.
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;
