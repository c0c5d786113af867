//! Windowed emotion sampling.
//!
//! A classifier collaborator is polled for a fixed window and the per-label
//! probability mass is reduced to one dominant label.

pub mod aggregator;
pub mod labels;
pub mod sampler;
