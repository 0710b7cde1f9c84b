//! # parley
//!
//! Operational entry points for the Parley engine: command-line parsing and
//! the commands the `parley` binary runs against a configured database.

#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
