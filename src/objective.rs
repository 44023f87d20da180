use crate::{
    common::*,
    model::{channel_stats, ActivationSnapshot},
};

/// Scalar loss values of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub loss: f64,
    pub content_loss: f64,
    pub style_loss: f64,
}

impl LossRecord {
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite() && self.content_loss.is_finite() && self.style_loss.is_finite()
    }
}

/// Loss tensors of one forward pass. `loss` is the only one carrying the graph
/// that is meant to be back-propagated; the components are kept for reporting.
#[derive(Debug)]
pub struct LossOutput {
    pub loss: Tensor,
    pub content_loss: Tensor,
    pub style_loss: Tensor,
}

impl LossOutput {
    pub fn record(&self) -> LossRecord {
        LossRecord {
            loss: self.loss.double_value(&[]),
            content_loss: self.content_loss.double_value(&[]),
            style_loss: self.style_loss.double_value(&[]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleTransferLoss {
    pub style_weight: f64,
    pub eps: f64,
}

impl StyleTransferLoss {
    pub fn new(style_weight: f64, eps: f64) -> Self {
        Self { style_weight, eps }
    }

    /// Mean squared error between the output's relu4_1 features and the AdaIN target.
    pub fn content_loss(&self, output_features: &Tensor, target: &Tensor) -> Tensor {
        output_features.mse_loss(target, Reduction::Mean)
    }

    /// Sum over the tapped layers of the mean squared errors between the channel means
    /// and between the channel standard deviations of output and style activations.
    pub fn style_loss(
        &self,
        output_snapshot: &ActivationSnapshot,
        style_snapshot: &ActivationSnapshot,
    ) -> Fallible<Tensor> {
        ensure!(
            output_snapshot.layers() == style_snapshot.layers(),
            "output layers {:?} and style layers {:?} differ",
            output_snapshot.layers(),
            style_snapshot.layers()
        );

        let terms = output_snapshot
            .iter()
            .map(|(layer, output)| {
                let style = style_snapshot
                    .get(layer)
                    .ok_or_else(|| format_err!("style activations of layer {} are missing", layer))?;
                let (output_mean, output_std) = channel_stats(output, self.eps);
                let (style_mean, style_std) = channel_stats(style, self.eps);
                Ok(output_mean.mse_loss(&style_mean, Reduction::Mean)
                    + output_std.mse_loss(&style_std, Reduction::Mean))
            })
            .collect::<Fallible<Vec<_>>>()?;

        terms
            .into_iter()
            .reduce(|lhs, rhs| lhs + rhs)
            .ok_or_else(|| format_err!("no activations to compute the style loss on"))
    }

    pub fn compute(
        &self,
        output_features: &Tensor,
        target: &Tensor,
        output_snapshot: &ActivationSnapshot,
        style_snapshot: &ActivationSnapshot,
    ) -> Fallible<LossOutput> {
        ensure!(
            output_features.size() == target.size(),
            "output features {:?} and adain target {:?} differ in shape",
            output_features.size(),
            target.size()
        );

        let content_loss = self.content_loss(output_features, target);
        let style_loss = self.style_loss(output_snapshot, style_snapshot)?;
        let loss = &content_loss + &style_loss * self.style_weight;

        Ok(LossOutput {
            loss,
            content_loss,
            style_loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::params;

    fn snapshot(scale: f64) -> ActivationSnapshot {
        params::TAP_LAYERS
            .iter()
            .zip([64, 128, 256, 512])
            .map(|(&layer, channels)| {
                let tensor = Tensor::randn([2, channels, 8, 8], (Kind::Float, Device::Cpu)) * scale;
                (layer, tensor)
            })
            .collect()
    }

    #[test]
    fn losses_are_non_negative_and_weighted() {
        tch::manual_seed(5);
        let loss_fn = StyleTransferLoss::new(10.0, params::ADAIN_EPS);
        let features = Tensor::randn([2, 512, 8, 8], (Kind::Float, Device::Cpu));
        let target = Tensor::randn([2, 512, 8, 8], (Kind::Float, Device::Cpu));

        let output = loss_fn
            .compute(&features, &target, &snapshot(1.0), &snapshot(3.0))
            .unwrap();
        let record = output.record();

        assert!(record.content_loss >= 0.0);
        assert!(record.style_loss > 0.0);
        let expected = record.content_loss + 10.0 * record.style_loss;
        assert!((record.loss - expected).abs() <= 1e-5 * expected.abs().max(1.0));
    }

    #[test]
    fn identical_activations_give_zero_loss() {
        tch::manual_seed(6);
        let loss_fn = StyleTransferLoss::new(7.5, params::ADAIN_EPS);
        let features = Tensor::randn([2, 512, 8, 8], (Kind::Float, Device::Cpu));
        let style = snapshot(2.0);
        let output_snapshot: ActivationSnapshot = style
            .iter()
            .map(|(layer, tensor)| (layer, tensor.copy()))
            .collect();

        let record = loss_fn
            .compute(&features, &features.copy(), &output_snapshot, &style)
            .unwrap()
            .record();

        assert_eq!(record.content_loss, 0.0);
        assert_eq!(record.style_loss, 0.0);
        assert_eq!(record.loss, 0.0);
    }

    #[test]
    fn style_weight_is_separable() {
        tch::manual_seed(7);
        let features = Tensor::randn([1, 512, 4, 4], (Kind::Float, Device::Cpu));
        let target = Tensor::zeros([1, 512, 4, 4], (Kind::Float, Device::Cpu));
        let output_snapshot = snapshot(1.0);
        let style_snapshot = snapshot(0.5);

        let unweighted = StyleTransferLoss::new(0.0, params::ADAIN_EPS)
            .compute(&features, &target, &output_snapshot, &style_snapshot)
            .unwrap()
            .record();
        assert_eq!(unweighted.loss, unweighted.content_loss);
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let loss_fn = StyleTransferLoss::new(1.0, params::ADAIN_EPS);
        let features = Tensor::zeros([1, 512, 4, 4], (Kind::Float, Device::Cpu));
        let partial: ActivationSnapshot = snapshot(1.0)
            .iter()
            .take(2)
            .map(|(layer, tensor)| (layer, tensor.shallow_clone()))
            .collect();

        assert!(loss_fn
            .compute(&features, &features, &partial, &snapshot(1.0))
            .is_err());
        assert!(loss_fn
            .compute(
                &features,
                &Tensor::zeros([1, 256, 4, 4], (Kind::Float, Device::Cpu)),
                &partial,
                &partial
            )
            .is_err());
    }
}
