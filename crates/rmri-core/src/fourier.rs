//! Centered, normalized 2-D spectral transforms between image and k-space.
//!
//! The transform is expressed as matrix products against precomputed
//! cosine/sine kernels rather than a radix FFT, so it runs on every tensor
//! backend (autodiff included) without a native FFT primitive. MRI grids are
//! modest, and the cascades dominate the cost of a forward pass, so the
//! quadratic kernel is an acceptable trade.
//!
//! Conventions follow the usual k-space bookkeeping:
//! - `centered` wraps the transform in `ifftshift`/`fftshift` so the DC
//!   component sits at the grid center in both domains.
//! - Normalization matches NumPy/PyTorch: `Ortho` scales both directions by
//!   `1/sqrt(N)`, `Backward` scales only the inverse by `1/N`, `Forward`
//!   scales only the forward transform.
//! - Spatial axes are configured against the complex-view rank (the stored
//!   tensor carries one extra trailing real/imaginary axis), negative values
//!   counting from the end, `[-2, -1]` by default.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Scaling convention of the transform pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FftNormalization {
    /// `1/sqrt(N)` applied to both directions.
    Ortho,
    /// `1/N` applied to the inverse transform only.
    Backward,
    /// `1/N` applied to the forward transform only.
    Forward,
}

/// Configuration of the 2-D spectral transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FftSpec {
    /// Shift the DC component to the grid center in both domains.
    pub centered: bool,
    /// Scaling convention.
    pub normalization: FftNormalization,
    /// The two spatial axes, indexed against the complex-view rank.
    pub spatial_dims: [isize; 2],
}

impl Default for FftSpec {
    fn default() -> Self {
        Self {
            centered: false,
            normalization: FftNormalization::Backward,
            spatial_dims: [-2, -1],
        }
    }
}

impl FftSpec {
    /// Centered orthonormal transform, the common reconstruction setting.
    pub fn ortho_centered() -> Self {
        Self {
            centered: true,
            normalization: FftNormalization::Ortho,
            spatial_dims: [-2, -1],
        }
    }

    fn resolve_axes<const D: usize>(&self) -> [usize; 2] {
        let rank = D as isize - 1;
        let mut axes = [0usize; 2];
        for (slot, &axis) in axes.iter_mut().zip(self.spatial_dims.iter()) {
            let resolved = if axis < 0 { rank + axis } else { axis };
            assert!(
                (0..rank).contains(&resolved),
                "spatial axis {axis} out of range for complex rank {rank}"
            );
            *slot = resolved as usize;
        }
        assert_ne!(axes[0], axes[1], "spatial axes must be distinct");
        axes
    }
}

/// Forward 2-D transform, image domain to k-space.
pub fn fft2<B: Backend, const D: usize>(x: Tensor<B, D>, spec: &FftSpec) -> Tensor<B, D> {
    spectral_transform(x, spec, false)
}

/// Inverse 2-D transform, k-space to image domain.
pub fn ifft2<B: Backend, const D: usize>(x: Tensor<B, D>, spec: &FftSpec) -> Tensor<B, D> {
    spectral_transform(x, spec, true)
}

fn spectral_transform<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    spec: &FftSpec,
    inverse: bool,
) -> Tensor<B, D> {
    let dims = x.dims();
    assert!(D >= 3, "spectral transform needs at least [x, y, 2] axes");
    assert_eq!(
        dims[D - 1],
        2,
        "spectral transform expects a trailing real/imaginary axis of size 2, got {}",
        dims[D - 1]
    );

    let axes = spec.resolve_axes::<D>();

    // Move the spatial axes next to the trailing pair axis so the transform
    // can collapse everything else into one batch axis.
    let mut order: Vec<usize> = (0..D)
        .filter(|i| *i != axes[0] && *i != axes[1] && *i != D - 1)
        .collect();
    order.push(axes[0]);
    order.push(axes[1]);
    order.push(D - 1);

    let identity = order.iter().enumerate().all(|(i, &o)| i == o);
    let perm: [isize; D] = core::array::from_fn(|i| order[i] as isize);
    let mut inverse_perm = [0isize; D];
    for (i, &o) in order.iter().enumerate() {
        inverse_perm[o] = i as isize;
    }

    let x = if identity { x } else { x.permute(perm) };
    let pdims = x.dims();
    let (h, w) = (pdims[D - 3], pdims[D - 2]);
    let batch: usize = pdims[..D - 3].iter().product();

    let mut t: Tensor<B, 4> = x.reshape([batch, h, w, 2]);

    if spec.centered {
        t = ifftshift(t, 1);
        t = ifftshift(t, 2);
    }

    t = dft_along(t, 2, inverse);
    t = dft_along(t, 1, inverse);

    let scale = match (spec.normalization, inverse) {
        (FftNormalization::Ortho, _) => 1.0 / ((h * w) as f64).sqrt(),
        (FftNormalization::Backward, true) => 1.0 / (h * w) as f64,
        (FftNormalization::Forward, false) => 1.0 / (h * w) as f64,
        _ => 1.0,
    };
    if scale != 1.0 {
        t = t.mul_scalar(scale);
    }

    if spec.centered {
        t = fftshift(t, 1);
        t = fftshift(t, 2);
    }

    let out: Tensor<B, D> = t.reshape(pdims);
    if identity {
        out
    } else {
        out.permute(inverse_perm)
    }
}

/// One separable DFT pass over `axis` (1 or 2) of a `[batch, h, w, 2]` tensor.
fn dft_along<B: Backend>(x: Tensor<B, 4>, axis: usize, inverse: bool) -> Tensor<B, 4> {
    let [n, h, w, _] = x.dims();
    let device = x.device();
    let len = if axis == 2 { w } else { h };
    let (kr, ki) = dft_kernel::<B>(len, inverse, &device);

    let re: Tensor<B, 3> = x.clone().narrow(3, 0, 1).squeeze(3);
    let im: Tensor<B, 3> = x.narrow(3, 1, 1).squeeze(3);

    let (out_re, out_im) = if axis == 2 {
        let re2: Tensor<B, 2> = re.reshape([n * h, w]);
        let im2: Tensor<B, 2> = im.reshape([n * h, w]);
        let or = re2.clone().matmul(kr.clone()) - im2.clone().matmul(ki.clone());
        let oi = re2.matmul(ki) + im2.matmul(kr);
        (or.reshape([n, h, w]), oi.reshape([n, h, w]))
    } else {
        let re2: Tensor<B, 2> = re.permute([0, 2, 1]).reshape([n * w, h]);
        let im2: Tensor<B, 2> = im.permute([0, 2, 1]).reshape([n * w, h]);
        let or = re2.clone().matmul(kr.clone()) - im2.clone().matmul(ki.clone());
        let oi = re2.matmul(ki) + im2.matmul(kr);
        (
            or.reshape([n, w, h]).permute([0, 2, 1]),
            oi.reshape([n, w, h]).permute([0, 2, 1]),
        )
    };

    Tensor::stack(vec![out_re, out_im], 3)
}

/// Dense DFT kernel, `exp(sign * 2*pi*i * j*l / len)` split into cosine and
/// sine factors. The index product is reduced modulo `len` so the angle stays
/// well-conditioned on large grids.
fn dft_kernel<B: Backend>(
    len: usize,
    inverse: bool,
    device: &B::Device,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let sign = if inverse { 1.0f64 } else { -1.0 };
    let step = sign * core::f64::consts::TAU / len as f64;

    let mut cos = Vec::with_capacity(len * len);
    let mut sin = Vec::with_capacity(len * len);
    for j in 0..len {
        for l in 0..len {
            let angle = step * ((j * l) % len) as f64;
            cos.push(angle.cos() as f32);
            sin.push(angle.sin() as f32);
        }
    }

    (
        Tensor::<B, 1>::from_data(cos.as_slice(), device).reshape([len, len]),
        Tensor::<B, 1>::from_data(sin.as_slice(), device).reshape([len, len]),
    )
}

/// Circular shift to the right by `shift` along `dim`.
pub fn roll<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    dim: usize,
    shift: usize,
) -> Tensor<B, D> {
    let n = x.dims()[dim];
    let s = shift % n;
    if s == 0 {
        return x;
    }
    Tensor::cat(
        vec![x.clone().narrow(dim, n - s, s), x.narrow(dim, 0, n - s)],
        dim,
    )
}

/// Move the DC component to the grid center along `dim`.
pub fn fftshift<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let n = x.dims()[dim];
    roll(x, dim, n / 2)
}

/// Undo [`fftshift`] along `dim`; differs for odd sizes.
pub fn ifftshift<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let n = x.dims()[dim];
    roll(x, dim, n - n / 2)
}
