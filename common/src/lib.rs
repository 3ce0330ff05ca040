// Common library for shared code across the pipeline, scheduler, and scraper

pub mod config;
pub mod errors;
pub mod git;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod provision;
pub mod publisher;
pub mod schedule;
pub mod scheduler;
pub mod scraper;
pub mod telemetry;
pub mod trigger;
