pub mod adain;
mod decoder;
mod encoder;
mod model;
pub mod params;

pub use adain::{adain, channel_stats};
pub use decoder::{Decoder, DecoderInit};
pub use encoder::{ActivationSnapshot, Encoder, EncoderOutput};
pub use model::{StyleTransferInit, StyleTransferModel, StyleTransferOutput};
