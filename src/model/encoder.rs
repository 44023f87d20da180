use super::params;
use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerKind {
    Conv(i64, i64),
    Relu,
    MaxPool,
}

// torchvision vgg19().features, truncated after relu4_1
const VGG19_FEATURES: [LayerKind; params::ENCODER_DEPTH] = {
    use LayerKind::*;
    [
        Conv(3, 64),
        Relu,
        Conv(64, 64),
        Relu,
        MaxPool,
        Conv(64, 128),
        Relu,
        Conv(128, 128),
        Relu,
        MaxPool,
        Conv(128, 256),
        Relu,
        Conv(256, 256),
        Relu,
        Conv(256, 256),
        Relu,
        Conv(256, 256),
        Relu,
        MaxPool,
        Conv(256, 512),
        Relu,
    ]
};

#[derive(Debug)]
enum Layer {
    Conv(Conv2D),
    Relu,
    MaxPool,
}

impl Layer {
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Conv(conv) => xs.apply(conv),
            // out-of-place so that tapped activations never alias the next layer
            Self::Relu => xs.relu(),
            Self::MaxPool => xs.max_pool2d_default(2),
        }
    }
}

/// Intermediate activations captured at [TAP_LAYERS](params::TAP_LAYERS) during one encoder pass.
///
/// The snapshot is an owned value returned per call, so a snapshot taken from the style
/// pass stays valid after the encoder is run again on other inputs.
#[derive(Debug)]
pub struct ActivationSnapshot {
    taps: Vec<(usize, Tensor)>,
}

impl ActivationSnapshot {
    pub fn get(&self, layer: usize) -> Option<&Tensor> {
        self.taps
            .iter()
            .find(|(index, _)| *index == layer)
            .map(|(_, tensor)| tensor)
    }

    pub fn layers(&self) -> Vec<usize> {
        self.taps.iter().map(|(index, _)| *index).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Tensor)> + '_ {
        self.taps.iter().map(|(index, tensor)| (*index, tensor))
    }
}

impl FromIterator<(usize, Tensor)> for ActivationSnapshot {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (usize, Tensor)>,
    {
        Self {
            taps: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug)]
pub struct EncoderOutput {
    /// relu4_1 features, `[batch, 512, h / 8, w / 8]`.
    pub features: Tensor,
    pub snapshot: ActivationSnapshot,
}

/// Frozen VGG-19 feature extractor.
///
/// The encoder owns its variable store. Its variables are frozen at construction and the
/// store is never exposed mutably, so no optimizer can ever be built over it.
#[derive(Debug)]
pub struct Encoder {
    vs: VarStore,
    layers: Vec<Layer>,
}

impl Encoder {
    pub fn new<P>(device: Device, weights: Option<P>) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let mut vs = VarStore::new(device);

        let layers = {
            let root = vs.root();
            let features = &root / "features";
            let conv_config = ConvConfig {
                padding: 1,
                stride: 1,
                ..Default::default()
            };

            VGG19_FEATURES
                .iter()
                .enumerate()
                .map(|(index, kind)| match *kind {
                    LayerKind::Conv(in_channels, out_channels) => Layer::Conv(nn::conv2d(
                        &features / index,
                        in_channels,
                        out_channels,
                        3,
                        conv_config,
                    )),
                    LayerKind::Relu => Layer::Relu,
                    LayerKind::MaxPool => Layer::MaxPool,
                })
                .collect::<Vec<_>>()
        };

        match weights {
            Some(path) => {
                let path = path.as_ref();
                vs.load(path).with_context(|| {
                    format!("failed to load encoder weights from {}", path.display())
                })?;
                info!("loaded encoder weights from {}", path.display());
            }
            None => warn!("encoder weights are not given, using random initialization"),
        }
        vs.freeze();

        Ok(Self { vs, layers })
    }

    pub fn forward_t(&self, images: &Tensor, _train: bool) -> EncoderOutput {
        debug_assert_eq!(images.dim(), 4);
        debug_assert_eq!(images.size()[1], params::IMAGE_CHANNELS);

        let mut taps = Vec::with_capacity(params::TAP_LAYERS.len());
        let features = self
            .layers
            .iter()
            .enumerate()
            .fold(images.shallow_clone(), |xs, (index, layer)| {
                let ys = layer.forward(&xs);
                if params::TAP_LAYERS.contains(&index) {
                    taps.push((index, ys.shallow_clone()));
                }
                ys
            });

        EncoderOutput {
            features,
            snapshot: ActivationSnapshot { taps },
        }
    }

    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn num_parameters(&self) -> i64 {
        self.vs
            .variables()
            .values()
            .map(|tensor| tensor.numel() as i64)
            .sum()
    }
}
