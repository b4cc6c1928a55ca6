//! Audio ingestion, alignment, echo cancellation, and dynamics processing.
//!
//! Stages run in pipeline order: [`normalize`] → [`aligner`] → [`leakage`] →
//! [`aec`] → [`dsp`] → [`quantize`]. [`capture`] is an external-collaborator
//! adapter (`cpal`) used only by the demo binary, not by the core pipeline.

pub mod aec;
pub mod aligner;
pub mod biquad;
pub mod capture;
pub mod dsp;
pub mod format;
pub mod leakage;
pub mod normalize;
pub mod quantize;
