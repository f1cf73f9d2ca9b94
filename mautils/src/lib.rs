//! Shared network helpers for the Music Assistant server workspace.
//!
//! This crate hosts the small pieces that do not belong to any one
//! subsystem: local IP autodetection (used to build the published stream
//! base URL), free-port selection for the stream server and port ownership
//! diagnostics for bind failures.

mod ip_utils;
mod process;

pub use ip_utils::{guess_local_ip, list_all_ips, select_free_port};
pub use process::{ProcessPortInfo, find_process_using_port};
