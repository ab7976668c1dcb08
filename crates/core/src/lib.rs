#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Component traits for the Taskflow orchestrator core.
//!
//! `taskflow-engine` provides the production implementations of these
//! traits; keeping them here lets tests substitute fakes for the DAG
//! analyzer, resource manager, executor, or scheduler independently.

pub mod dag;
pub mod executor;
pub mod resource;
pub mod scheduler;

pub use dag::{validation_to_result, DagAnalyzer, DagValidation};
pub use executor::JobExecutor;
pub use resource::{AdmissionDecision, ResourceManager};
pub use scheduler::{EventSink, EventSubscriber, WorkflowOutcome, WorkflowScheduler};
