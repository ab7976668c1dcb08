#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Production implementations of the Taskflow orchestrator core's
//! component traits: DAG analysis, resource admission, job execution, and
//! scheduling.

pub mod dag;
pub mod events;
pub mod executor;
pub mod resource;
pub mod scheduler;

pub use dag::PetgraphDagAnalyzer;
pub use events::{InMemoryEventSink, RecordingSubscriber};
pub use executor::{ProcessJobExecutor, OUTPUT_CAPTURE_LIMIT};
pub use resource::SystemResourceManager;
pub use scheduler::DagWorkflowScheduler;
