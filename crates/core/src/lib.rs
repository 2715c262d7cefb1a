//! Storyreel domain core.
//!
//! Pure data model and decision logic for the generative-media pipeline.
//! Nothing in this crate performs I/O; the external collaborators it needs
//! are expressed as traits in [`services`] and implemented elsewhere.

pub mod artifact;
pub mod chunk;
pub mod continuity;
pub mod error;
pub mod generation;
pub mod job;
pub mod services;
pub mod stitching;
pub mod types;
