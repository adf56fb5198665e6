//! Diff segmentation and path filtering.
//!
//! Splits unified diffs at file and hunk boundaries without rewriting them,
//! and decides which changed paths are eligible for review using
//! include/exclude regular expressions.

pub mod filter;
pub mod parser;
