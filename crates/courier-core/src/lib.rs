mod alert;
mod config;
mod error;
mod sched;
mod service;

pub mod db;
pub mod push;

pub use alert::{AlertSink, LogAlertSink};
pub use config::{
    DatabaseConfig, HibernateConfig, ModuleConfig, PushConfig, ServiceConfig, ServiceInfo,
};
pub use error::{ConfigError, DbError, PushError};
pub use sched::{Scheduler, TaskFn};
pub use service::PushService;
