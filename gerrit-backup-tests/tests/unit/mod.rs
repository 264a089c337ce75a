//! Unit tests for gerrit-backup
//!
//! These exercise library components through their public API with the
//! mock collaborators exported next to each trait.

mod archive;
mod config;
mod remote;
mod repo_list;
mod storage;
mod tasks;
