//! HTTP API for campaign management, activity webhooks, and probes.

pub mod rest;
pub mod server;

pub use server::ApiServer;
