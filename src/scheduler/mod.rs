//! Recurring fleet passes and their run history.

pub mod cron;
pub mod engine;
pub mod history;

pub use self::cron::FleetSchedule;
pub use self::engine::run_scheduler_loop;
pub use self::history::{DeviceRunOutcome, FleetRunReport, RunHistory, RunTrigger};
