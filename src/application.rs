//! Application layer
//!
//! Wires the infrastructure pieces into a harvest run: the scheduler, the
//! per-item pipeline and the service that owns startup and shutdown.

pub mod harvest_pipeline;
pub mod harvest_service;
pub mod task_scheduler;

pub use harvest_pipeline::HarvestPipeline;
pub use harvest_service::{HarvestService, spawn_interrupt_handler};
pub use task_scheduler::{ItemProcessor, RunReport, SchedulerSettings, TaskScheduler};
