//! rkfs: handle-based remote access to the RK8s distributed filesystem.
//!
//! Clients open a file and get back an opaque handle token, then drive the
//! file through independent read/write/close calls. Handles abandoned without
//! a close are reclaimed by the reaper.

pub mod backend;
pub mod buffer;
pub mod client;
pub mod config;
pub mod handle;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod service;
pub mod tls;
pub mod token;
