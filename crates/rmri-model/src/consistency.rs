//! Data-consistency against the measured k-space samples.

use burn::module::Param;
use burn::prelude::*;

use rmri_core::coil::{sense_expand, sense_reduce};
use rmri_core::fourier::{fft2, ifft2, FftSpec};

/// Soft data-consistency blend with a learned scalar weight.
///
/// `apply` pulls a candidate k-space estimate toward the measurement at
/// sampled locations: `denoised - w * (denoised - measurement) * mask`.
/// With `w = 1` the sampled entries are replaced outright; training moves the
/// weight away from hard substitution where the measurement is noisy.
#[derive(Module, Debug)]
pub struct SoftDataConsistency<B: Backend> {
    pub weight: Param<Tensor<B, 1>>,
}

impl<B: Backend> SoftDataConsistency<B> {
    /// Weight initialized to one.
    pub fn new(device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([1], device)),
        }
    }

    /// Blend `denoised` toward `measurement` where `mask` samples.
    pub fn apply<const D: usize>(
        &self,
        denoised: Tensor<B, D>,
        measurement: &Tensor<B, D>,
        mask: &Tensor<B, D>,
    ) -> Tensor<B, D> {
        let weight = self.weight.val().reshape([1; D]);
        denoised.clone() - (denoised - measurement.clone()) * mask.clone() * weight
    }
}

/// Data-consistency gradient of the measurement log-likelihood at the current
/// image estimate, concatenated with the estimate itself into the 4-channel
/// input the recurrent inference cell consumes.
///
/// `eta` is `[batch, x, y, 2]`; the result is `[batch, 4, x, y]` with the
/// estimate in channels 0..2 and the gradient in channels 2..4.
pub fn log_likelihood_gradient<B: Backend>(
    eta: &Tensor<B, 4>,
    measurement: &Tensor<B, 5>,
    sensitivity_maps: &Tensor<B, 5>,
    mask: &Tensor<B, 5>,
    sigma: f64,
    fft: &FftSpec,
) -> Tensor<B, 4> {
    let predicted_kspace = fft2(
        sense_expand(eta.clone(), sensitivity_maps.clone(), 1),
        fft,
    ) * mask.clone();
    let residual = (predicted_kspace - measurement.clone()) * mask.clone() / (sigma * sigma);
    let gradient: Tensor<B, 4> = sense_reduce(ifft2(residual, fft), sensitivity_maps.clone(), 1);

    Tensor::cat(
        vec![
            eta.clone().permute([0, 3, 1, 2]),
            gradient.permute([0, 3, 1, 2]),
        ],
        1,
    )
}
