use super::{
    adain::adain,
    decoder::{Decoder, DecoderInit},
    encoder::{ActivationSnapshot, Encoder, EncoderOutput},
    params,
};
use crate::common::*;

// output type

#[derive(Debug)]
pub struct StyleTransferOutput {
    /// Decoded images, `[batch, 3, h, w]` in `[-1, 1]`.
    pub output: Tensor,
    /// AdaIN target the decoder was fed with.
    pub target: Tensor,
    /// Activations of the raw style pass.
    pub style_snapshot: ActivationSnapshot,
    /// relu4_1 features of the decoded images.
    pub output_features: Tensor,
    /// Activations of the re-encoded output pass.
    pub output_snapshot: ActivationSnapshot,
}

#[derive(Debug, Clone)]
pub struct StyleTransferInit {
    pub adain_eps: f64,
    pub decoder: DecoderInit,
}

impl Default for StyleTransferInit {
    fn default() -> Self {
        Self {
            adain_eps: params::ADAIN_EPS,
            decoder: DecoderInit::default(),
        }
    }
}

impl StyleTransferInit {
    /// Builds the model around a frozen `encoder`. Only the variables created under
    /// `decoder_path` are trainable.
    pub fn build<'p, P>(self, encoder: Encoder, decoder_path: P) -> StyleTransferModel
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = decoder_path.borrow();
        let Self { adain_eps, decoder } = self;

        let iteration = path.zeros_no_train("iteration", &[]);
        let decoder = decoder.build(path / "decoder");

        StyleTransferModel {
            adain_eps,
            encoder,
            decoder,
            iteration,
        }
    }
}

/// Encoder, AdaIN and decoder composed into one arbitrary-style transfer network.
#[derive(Debug)]
pub struct StyleTransferModel {
    adain_eps: f64,
    encoder: Encoder,
    decoder: Decoder,
    iteration: Tensor,
}

impl StyleTransferModel {
    /// Runs the training forward pass.
    ///
    /// Content and style are encoded without gradient tracking. The decoded output is
    /// encoded again with gradients so the loss can flow back into the decoder.
    pub fn forward_t(
        &self,
        content: &Tensor,
        style: &Tensor,
        train: bool,
    ) -> Fallible<StyleTransferOutput> {
        ensure!(
            content.size() == style.size(),
            "content batch {:?} and style batch {:?} differ in shape",
            content.size(),
            style.size()
        );

        let (target, style_snapshot) = tch::no_grad(|| -> Fallible<_> {
            let content_features = self.encoder.forward_t(content, train).features;
            let EncoderOutput {
                features: style_features,
                snapshot: style_snapshot,
            } = self.encoder.forward_t(style, train);
            let target = adain(&content_features, &style_features, self.adain_eps)?;
            Ok((target, style_snapshot))
        })?;

        let output = self.decoder.forward_t(&target, train);

        let EncoderOutput {
            features: output_features,
            snapshot: output_snapshot,
        } = self.encoder.forward_t(&output, train);

        Ok(StyleTransferOutput {
            output,
            target,
            style_snapshot,
            output_features,
            output_snapshot,
        })
    }

    /// Stylizes `content` with `style` without the loss-side re-encoding.
    pub fn stylize(&self, content: &Tensor, style: &Tensor, train: bool) -> Fallible<Tensor> {
        let content_features = self.encoder.forward_t(content, train).features;
        let style_features = self.encoder.forward_t(style, train).features;
        let target = adain(&content_features, &style_features, self.adain_eps)?;
        Ok(self.decoder.forward_t(&target, train))
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Iteration stored alongside the decoder weights.
    pub fn iteration(&self) -> i64 {
        self.iteration.int64_value(&[])
    }

    pub fn set_iteration(&mut self, iteration: usize) {
        let iteration_tensor = Tensor::from(iteration as i64);
        tch::no_grad(|| {
            self.iteration.copy_(&iteration_tensor);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(vs: &VarStore) -> StyleTransferModel {
        let encoder = Encoder::new::<&Path>(vs.device(), None).unwrap();
        StyleTransferInit::default().build(encoder, vs.root())
    }

    #[test]
    fn forward_exposes_target_and_snapshots() {
        tch::manual_seed(4);
        let vs = VarStore::new(Device::Cpu);
        let model = model(&vs);

        let content = Tensor::randn([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let style = Tensor::randn([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let out = model.forward_t(&content, &style, true).unwrap();

        assert_eq!(out.output.size(), vec![2, 3, 64, 64]);
        assert_eq!(out.target.size(), vec![2, 512, 8, 8]);
        assert_eq!(out.output_features.size(), out.target.size());
        assert_eq!(out.style_snapshot.layers(), params::TAP_LAYERS.to_vec());
        assert_eq!(out.output_snapshot.layers(), params::TAP_LAYERS.to_vec());

        assert!(!out.target.requires_grad());
        assert!(out.output.requires_grad());
        assert!(out.output_features.requires_grad());
    }

    #[test]
    fn only_decoder_variables_are_trainable() {
        let vs = VarStore::new(Device::Cpu);
        let model = model(&vs);

        let trainable = vs.trainable_variables().len();
        assert_eq!(trainable, 8 * 2);
        assert!(model.encoder().var_store().trainable_variables().is_empty());
        assert!(vs.variables().contains_key("iteration"));
    }

    #[test]
    fn mismatched_batches_are_rejected() {
        let vs = VarStore::new(Device::Cpu);
        let model = model(&vs);

        let content = Tensor::randn([2, 3, 32, 32], (Kind::Float, Device::Cpu));
        let style = Tensor::randn([1, 3, 32, 32], (Kind::Float, Device::Cpu));
        assert!(model.forward_t(&content, &style, true).is_err());
    }

    #[test]
    fn iteration_buffer_round_trip() {
        let vs = VarStore::new(Device::Cpu);
        let mut model = model(&vs);
        assert_eq!(model.iteration(), 0);
        model.set_iteration(1234);
        assert_eq!(model.iteration(), 1234);
    }
}
