//! CLI command handlers
//!
//! This module contains the command handlers for the cellcurate CLI.
//! Each subcommand is implemented in its own module.

pub mod backups;
pub mod classify;
pub mod graph;
pub mod helpers;
pub mod restore;
pub mod subset;
