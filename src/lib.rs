//! Arbitrary style transfer with adaptive instance normalization.
//!
//! A frozen VGG-19 encoder, the AdaIN feature transform and a trainable decoder, together
//! with the content/style objective and the training loop driving them.

pub mod checkpoint;
pub mod common;
pub mod config;
pub mod dataset;
pub mod model;
pub mod objective;
pub mod preview;
pub mod tracker;
pub mod train;
