//! Command-line interface
//!
//! Argument model, command handlers and the interactive session console.

pub mod args;
pub mod commands;
pub mod console;
