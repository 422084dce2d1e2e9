//! Self-moderation engine: per-channel spam detectors that escalate from
//! message deletion and alerts to accumulated hard punishments.

pub mod adder;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod event;
pub mod fault;
pub mod gateway;
pub mod logging;
pub mod policy;
pub mod punishment;
pub mod storage;
pub mod window;
