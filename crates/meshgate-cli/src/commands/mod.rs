//! CLI command handlers

pub mod check;
pub mod keygen;
pub mod run;
