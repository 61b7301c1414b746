//! Core domain types and logic.

pub mod account;
pub mod error;
pub mod holding;
pub mod market;
pub mod money;
pub mod operation;
pub mod pagination;
pub mod settings;
pub mod trading;
