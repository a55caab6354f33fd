//! llm-deploy: request → generate → publish → notify.
//!
//! Accepts a job over HTTP, asks a model for a single-file web page,
//! publishes it to a GitHub repository with Pages enabled, and reports the
//! result to the evaluator's callback URL.

pub mod auth;
pub mod config;
pub mod error;
pub mod fakes;
pub mod generator;
pub mod github;
pub mod job;
pub mod llm;
pub mod locks;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod web;
