pub mod config;
pub mod report;
pub mod task;
pub mod timing;
