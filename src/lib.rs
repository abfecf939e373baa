//! A job execution engine.
//!
//! Jobs are typed, versioned units of work configured through a
//! [`PropertyRegistry`](property::PropertyRegistry). Running one takes
//! advisory read/write locks on the data objects it touches, reports progress
//! through a [`ProgressHub`](progress::ProgressHub), may spawn child jobs or
//! fan out over collections, and stamps a provenance record on what it
//! produced.

pub mod cli;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod history;
pub mod job;
pub mod jobs;
pub mod logging;
pub mod progress;
pub mod property;
pub mod ui;
