//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is open.
//!
//! # Tasks
//! - Maintenance: Sweeps expired entries and writes snapshot checkpoints

mod maintenance;

pub use maintenance::{spawn_maintenance_task, Maintenance, MaintenanceSchedule};
