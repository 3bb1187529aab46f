//! ChatOps deployment relay.
//!
//! A Slack slash command creates a deployment record, the relay injects a
//! GitHub Actions workflow into the target repository if one is missing,
//! fires a `repository_dispatch` carrying the record id, and the workflow
//! reports its verdict back over an authenticated webhook. The relay then
//! persists the terminal state and announces the result in Slack.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod errors;
pub mod github;
pub mod logs;
pub mod models;
pub mod security;
pub mod server;
pub mod slack;
