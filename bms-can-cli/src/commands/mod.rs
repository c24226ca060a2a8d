//! Subcommand handlers

pub mod capture;
pub mod decode;
pub mod filter;
pub mod shell;
pub mod table;
