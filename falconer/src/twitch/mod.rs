//! Third-party "went live" monitor and its API plumbing.

mod auth;
mod client;
mod monitor;

pub use auth::{AccessToken, AuthenticationManager};
pub use client::{Client, StreamInfo};
pub use monitor::{Monitor, default_download_handler};
