use super::params;
use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Relu,
    Tanh,
}

#[derive(Debug)]
enum Stage {
    Upsample,
    Conv(Conv2D, Activation),
}

#[derive(Debug, Clone)]
pub struct DecoderInit {
    pub in_channels: i64,
    pub out_channels: i64,
    pub kernel_size: i64,
}

impl Default for DecoderInit {
    fn default() -> Self {
        Self {
            in_channels: params::FEATURE_CHANNELS,
            out_channels: params::IMAGE_CHANNELS,
            kernel_size: 3,
        }
    }
}

impl DecoderInit {
    pub fn build<'p, P>(self, path: P) -> Decoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            in_channels,
            out_channels,
            kernel_size,
        } = self;

        // reflection padding is applied explicitly before every conv
        let conv_config = ConvConfig {
            padding: 0,
            stride: 1,
            ..Default::default()
        };
        let mut conv_index = 0;
        let mut conv = |from: i64, to: i64, activation: Activation| {
            conv_index += 1;
            let layer = nn::conv2d(
                path / format!("conv{}", conv_index),
                from,
                to,
                kernel_size,
                conv_config,
            );
            Stage::Conv(layer, activation)
        };

        let stages = vec![
            Stage::Upsample,
            conv(in_channels, 256, Activation::Relu),
            Stage::Upsample,
            conv(256, 256, Activation::Relu),
            conv(256, 128, Activation::Relu),
            Stage::Upsample,
            conv(128, 128, Activation::Relu),
            conv(128, 64, Activation::Relu),
            conv(64, 64, Activation::Relu),
            conv(64, out_channels, Activation::Tanh),
        ];

        Decoder {
            in_channels,
            out_channels,
            padding: (kernel_size - 1) / 2,
            stages,
        }
    }
}

/// Trainable decoder mapping `[batch, 512, h, w]` features to `[batch, 3, 8h, 8w]` images in `[-1, 1]`.
#[derive(Debug)]
pub struct Decoder {
    in_channels: i64,
    out_channels: i64,
    padding: i64,
    stages: Vec<Stage>,
}

impl Decoder {
    pub fn forward_t(&self, features: &Tensor, _train: bool) -> Tensor {
        debug_assert_eq!(features.size()[1], self.in_channels);

        let padding = [self.padding; 4];
        self.stages
            .iter()
            .fold(features.shallow_clone(), |xs, stage| match stage {
                Stage::Upsample => {
                    let size = xs.size();
                    let (h, w) = (size[2], size[3]);
                    xs.upsample_nearest2d([h * 2, w * 2], None::<f64>, None::<f64>)
                }
                Stage::Conv(conv, activation) => {
                    let ys = xs.reflection_pad2d(padding).apply(conv);
                    match activation {
                        Activation::Relu => ys.relu(),
                        Activation::Tanh => ys.tanh(),
                    }
                }
            })
    }

    pub fn out_channels(&self) -> i64 {
        self.out_channels
    }
}
