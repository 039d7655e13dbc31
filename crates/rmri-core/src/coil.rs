//! Multi-coil combination and expansion through sensitivity maps.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::complex::{complex_conj, complex_mul};

/// How a per-coil complex image is reduced to a single complex image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoilCombinationMethod {
    /// Sensitivity-weighted combination, `sum_c image_c * conj(S_c)`.
    Sense,
    /// Root-sum-of-squares magnitude. The result carries the magnitude in the
    /// real channel and a zero imaginary channel so both methods share one
    /// output contract.
    Rss,
}

/// Sensitivity-weighted reduction over the coil axis.
pub fn sense_reduce<B: Backend, const D: usize, const DO: usize>(
    image: Tensor<B, D>,
    maps: Tensor<B, D>,
    coil_dim: usize,
) -> Tensor<B, DO> {
    complex_mul(image, complex_conj(maps))
        .sum_dim(coil_dim)
        .squeeze(coil_dim)
}

/// Per-coil expansion of a combined image, `image * S_c`.
pub fn sense_expand<B: Backend, const DI: usize, const D: usize>(
    image: Tensor<B, DI>,
    maps: Tensor<B, D>,
    coil_dim: usize,
) -> Tensor<B, D> {
    complex_mul(image.unsqueeze_dim(coil_dim), maps)
}

/// Root-sum-of-squares over the coil axis, returned as a complex pair with a
/// zero imaginary part.
pub fn rss<B: Backend, const D: usize, const DO: usize>(
    image: Tensor<B, D>,
    coil_dim: usize,
) -> Tensor<B, DO> {
    let magnitude: Tensor<B, DO> = image
        .powf_scalar(2.0)
        .sum_dim(D - 1)
        .sum_dim(coil_dim)
        .sqrt()
        .squeeze(coil_dim);
    let zeros = magnitude.zeros_like().narrow(DO - 1, 0, 1);
    Tensor::cat(vec![magnitude.narrow(DO - 1, 0, 1), zeros], DO - 1)
}

/// Reduce a per-coil complex image with the configured method.
pub fn coil_combination<B: Backend, const D: usize, const DO: usize>(
    image: Tensor<B, D>,
    maps: Tensor<B, D>,
    method: CoilCombinationMethod,
    coil_dim: usize,
) -> Tensor<B, DO> {
    match method {
        CoilCombinationMethod::Sense => sense_reduce(image, maps, coil_dim),
        CoilCombinationMethod::Rss => rss(image, coil_dim),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    /// Unit-magnitude, zero-phase single-coil maps.
    fn unit_maps(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 5> {
        let ones = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], device);
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], device);
        Tensor::stack(vec![ones, zeros], 4)
    }

    #[test]
    fn test_expand_reduce_round_trip_single_coil() {
        let device = Default::default();
        let maps = unit_maps(&device);
        let image = Tensor::<TestBackend, 4>::random(
            [1, 4, 4, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let expanded = sense_expand(image.clone(), maps.clone(), 1);
        assert_eq!(expanded.dims(), [1, 1, 4, 4, 2]);

        let reduced: Tensor<TestBackend, 4> = sense_reduce(expanded, maps, 1);
        let diff = (reduced - image).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_rss_single_coil_is_magnitude() {
        let device = Default::default();
        let image = Tensor::<TestBackend, 5>::random(
            [1, 1, 4, 4, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let combined: Tensor<TestBackend, 4> = rss(image.clone(), 1);
        assert_eq!(combined.dims(), [1, 4, 4, 2]);

        let expected: Tensor<TestBackend, 4> =
            crate::complex::complex_abs_keep(image).squeeze(1);
        let re = combined.clone().narrow(3, 0, 1);
        let im = combined.narrow(3, 1, 1);
        let re_err = (re - expected).abs().max().into_scalar();
        let im_err = im.abs().max().into_scalar();
        assert!(re_err < 1e-5);
        assert!(im_err < 1e-7);
    }
}
