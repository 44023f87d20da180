use super::params;
use crate::common::*;

/// Per-sample, per-channel spatial mean and standard deviation, both `[batch, channels, 1, 1]`.
///
/// The variance is the population variance; `eps` is added before the square root so a
/// constant channel yields `sqrt(eps)` instead of zero.
pub fn channel_stats(xs: &Tensor, eps: f64) -> (Tensor, Tensor) {
    let dims = params::SPATIAL_DIMS.as_slice();
    let mean = xs.mean_dim(dims, true, Kind::Float);
    let std = (xs.var_dim(dims, false, true) + eps).sqrt();
    (mean, std)
}

/// Adaptive instance normalization.
///
/// Re-normalizes every channel of `content` to the spatial mean and standard deviation of
/// the corresponding `style` channel, i.e. `std_s * (c - mean_c) / std_c + mean_s`.
pub fn adain(content: &Tensor, style: &Tensor, eps: f64) -> Fallible<Tensor> {
    ensure!(
        content.dim() == 4 && style.dim() == 4,
        "adain expects 4-d feature maps, got content {:?} and style {:?}",
        content.size(),
        style.size()
    );
    let (content_batch, content_channels, _, _) = content.size4()?;
    let (style_batch, style_channels, _, _) = style.size4()?;
    ensure!(
        content_batch == style_batch && content_channels == style_channels,
        "content features {:?} and style features {:?} do not match",
        content.size(),
        style.size()
    );

    let (content_mean, content_std) = channel_stats(content, eps);
    let (style_mean, style_std) = channel_stats(style, eps);

    let normalized = (content - content_mean) / content_std;
    Ok(normalized * style_std + style_mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-3;

    fn max_abs_diff(lhs: &Tensor, rhs: &Tensor) -> f64 {
        (lhs - rhs).abs().max().double_value(&[])
    }

    #[test]
    fn adain_with_itself_is_identity() {
        tch::manual_seed(1);
        let content = Tensor::randn([2, 8, 16, 16], (Kind::Float, Device::Cpu)) * 3.0 + 1.5;
        let output = adain(&content, &content, params::ADAIN_EPS).unwrap();
        assert!(max_abs_diff(&output, &content) < TOLERANCE);
    }

    #[test]
    fn adain_output_matches_style_statistics() {
        tch::manual_seed(2);
        let content = Tensor::randn([3, 4, 12, 12], (Kind::Float, Device::Cpu));
        let style = Tensor::randn([3, 4, 20, 20], (Kind::Float, Device::Cpu)) * 5.0 - 2.0;
        let output = adain(&content, &style, params::ADAIN_EPS).unwrap();

        let (output_mean, output_std) = channel_stats(&output, params::ADAIN_EPS);
        let (style_mean, style_std) = channel_stats(&style, params::ADAIN_EPS);

        assert_eq!(output.size(), content.size());
        assert!(max_abs_diff(&output_mean, &style_mean) < TOLERANCE);
        assert!(max_abs_diff(&output_std, &style_std) < TOLERANCE);
    }

    #[test]
    fn constant_channel_is_stable() {
        let content = Tensor::ones([1, 2, 8, 8], (Kind::Float, Device::Cpu));
        let style = Tensor::randn([1, 2, 8, 8], (Kind::Float, Device::Cpu));
        let output = adain(&content, &style, params::ADAIN_EPS).unwrap();

        let finite = output.isfinite().all().int64_value(&[]);
        assert_eq!(finite, 1);

        // a flat content channel maps onto the flat style mean
        let (style_mean, _) = channel_stats(&style, params::ADAIN_EPS);
        let expected = style_mean.expand_as(&output);
        assert!(max_abs_diff(&output, &expected) < TOLERANCE);
    }

    #[test]
    fn mismatched_channels_are_rejected() {
        let content = Tensor::zeros([1, 4, 8, 8], (Kind::Float, Device::Cpu));
        let style = Tensor::zeros([1, 8, 8, 8], (Kind::Float, Device::Cpu));
        assert!(adain(&content, &style, params::ADAIN_EPS).is_err());

        let flat = Tensor::zeros([4, 64], (Kind::Float, Device::Cpu));
        assert!(adain(&flat, &flat, params::ADAIN_EPS).is_err());
    }

    #[test]
    fn adain_is_differentiable() {
        let content = Tensor::randn([1, 2, 4, 4], (Kind::Float, Device::Cpu)).set_requires_grad(true);
        let style = Tensor::randn([1, 2, 4, 4], (Kind::Float, Device::Cpu));
        let output = adain(&content, &style, params::ADAIN_EPS).unwrap();
        output.pow_tensor_scalar(2).sum(Kind::Float).backward();
        assert!(content.grad().defined());
    }
}
