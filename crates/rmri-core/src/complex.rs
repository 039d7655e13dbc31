//! Complex arithmetic on real/imaginary-paired tensors.
//!
//! k-space data and complex images are stored as real tensors whose trailing
//! axis has size 2 (real part, imaginary part). Every operation here is
//! generic over the tensor rank and leaves the leading axes untouched, so the
//! same helpers serve single-coil images, multi-coil k-space and multi-echo
//! stacks alike.

use burn::tensor::{backend::Backend, Tensor};

/// Real part, keeping a size-1 trailing axis.
pub fn real<B: Backend, const D: usize>(x: &Tensor<B, D>) -> Tensor<B, D> {
    x.clone().narrow(D - 1, 0, 1)
}

/// Imaginary part, keeping a size-1 trailing axis.
pub fn imag<B: Backend, const D: usize>(x: &Tensor<B, D>) -> Tensor<B, D> {
    x.clone().narrow(D - 1, 1, 1)
}

/// Element-wise complex product of two paired tensors.
///
/// Broadcasting over size-1 leading axes follows the backend's element-wise
/// rules, so `[batch, 1, x, y, 2]` multiplies against `[batch, coil, x, y, 2]`.
pub fn complex_mul<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, D> {
    let (ar, ai) = (real(&a), imag(&a));
    let (br, bi) = (real(&b), imag(&b));
    Tensor::cat(
        vec![
            ar.clone() * br.clone() - ai.clone() * bi.clone(),
            ar * bi + ai * br,
        ],
        D - 1,
    )
}

/// Complex conjugate.
pub fn complex_conj<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    Tensor::cat(vec![real(&x), imag(&x).neg()], D - 1)
}

/// Magnitude with the trailing pair axis reduced to size 1.
pub fn complex_abs_keep<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.powf_scalar(2.0).sum_dim(D - 1).sqrt()
}

/// Magnitude with the trailing pair axis removed.
pub fn complex_abs<B: Backend, const D: usize, const DO: usize>(x: Tensor<B, D>) -> Tensor<B, DO> {
    complex_abs_keep(x).squeeze(D - 1)
}

/// Squared magnitude with the trailing pair axis removed.
pub fn complex_abs_sq<B: Backend, const D: usize, const DO: usize>(
    x: Tensor<B, D>,
) -> Tensor<B, DO> {
    x.powf_scalar(2.0).sum_dim(D - 1).squeeze(D - 1)
}

/// Split a paired tensor into its real and imaginary components.
pub fn into_parts<B: Backend, const D: usize, const DO: usize>(
    x: Tensor<B, D>,
) -> (Tensor<B, DO>, Tensor<B, DO>) {
    (
        real(&x).squeeze(D - 1),
        imag(&x).squeeze(D - 1),
    )
}

/// Merge real and imaginary components back into a paired tensor.
pub fn from_parts<B: Backend, const DI: usize, const D: usize>(
    re: Tensor<B, DI>,
    im: Tensor<B, DI>,
) -> Tensor<B, D> {
    Tensor::stack(vec![re, im], DI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_parts_round_trip() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random(
            [2, 8, 8, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let (re, im) = into_parts::<_, 4, 3>(x.clone());
        let back: Tensor<TestBackend, 4> = from_parts(re, im);

        let diff = (back - x).abs().max().into_scalar();
        assert!(diff < 1e-7, "round trip drift {diff}");
    }

    #[test]
    fn test_mul_conj_gives_squared_magnitude() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random(
            [1, 4, 4, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        // x * conj(x) is |x|^2 with a zero imaginary part
        let product = complex_mul(x.clone(), complex_conj(x.clone()));
        let mag_sq: Tensor<TestBackend, 3> = complex_abs_sq(x);

        let re: Tensor<TestBackend, 3> = real(&product).squeeze(3);
        let im: Tensor<TestBackend, 3> = imag(&product).squeeze(3);

        let re_err = (re - mag_sq).abs().max().into_scalar();
        let im_err = im.abs().max().into_scalar();
        assert!(re_err < 1e-5);
        assert!(im_err < 1e-5);
    }

    #[test]
    fn test_conj_negates_imaginary() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::from_floats([[[1.0, 2.0], [3.0, -4.0]]], &device);
        let c = complex_conj(x);

        let expected = Tensor::<TestBackend, 3>::from_floats([[[1.0, -2.0], [3.0, 4.0]]], &device);
        let diff = (c - expected).abs().max().into_scalar();
        assert!(diff < 1e-7);
    }
}
