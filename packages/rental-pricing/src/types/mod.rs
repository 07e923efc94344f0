//! Data types for the pricing pipeline.

pub mod catalog;
pub mod config;
pub mod detail;
pub mod duration;
pub mod listing;
pub mod output;
