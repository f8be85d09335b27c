pub mod batch;
pub mod broker;
pub mod consumer;
pub mod engine;
pub mod lifecycle;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod sweep;
pub mod telemetry;
pub mod upload;
pub mod validation;
