//! Core trait abstractions for the pricing pipeline.
//!
//! These traits define the external collaborators: something that can
//! render a page, and something that can read records out of it.

pub mod extractor;
pub mod fetcher;
