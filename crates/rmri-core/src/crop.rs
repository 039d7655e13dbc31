//! Center-cropping of spatial axes.

use burn::tensor::{backend::Backend, Tensor};

/// Crop two axes to `target` extents around the geometric center.
///
/// Axes already at or below the requested extent are left untouched.
pub fn center_crop<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    axes: [usize; 2],
    target: [usize; 2],
) -> Tensor<B, D> {
    let mut out = x;
    for (axis, wanted) in axes.into_iter().zip(target) {
        let size = out.dims()[axis];
        let keep = wanted.min(size);
        let start = (size - keep) / 2;
        out = out.narrow(axis, start, keep);
    }
    out
}

/// Crop both operands to the smaller of the two extents on each axis.
pub fn center_crop_to_smallest<B: Backend, const DA: usize, const DB: usize>(
    a: Tensor<B, DA>,
    b: Tensor<B, DB>,
    axes_a: [usize; 2],
    axes_b: [usize; 2],
) -> (Tensor<B, DA>, Tensor<B, DB>) {
    let (da, db) = (a.dims(), b.dims());
    let target = [
        da[axes_a[0]].min(db[axes_b[0]]),
        da[axes_a[1]].min(db[axes_b[1]]),
    ];
    (
        center_crop(a, axes_a, target),
        center_crop(b, axes_b, target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_center_crop_matches_manual_index_range() {
        let device = Default::default();
        let data: Vec<f32> = (0..16 * 16).map(|v| v as f32).collect();
        let x = Tensor::<TestBackend, 1>::from_data(data.as_slice(), &device).reshape([1, 16, 16]);

        let cropped = center_crop(x.clone(), [1, 2], [10, 10]);
        assert_eq!(cropped.dims(), [1, 10, 10]);

        // (16 - 10) / 2 = 3, so rows/cols 3..13 survive.
        let expected = x.narrow(1, 3, 10).narrow(2, 3, 10);
        let diff = (cropped - expected).abs().max().into_scalar();
        assert!(diff < 1e-7);
    }

    #[test]
    fn test_crop_to_smallest_picks_min_extent_per_axis() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 3>::zeros([1, 10, 18], &device);
        let b = Tensor::<TestBackend, 3>::zeros([1, 16, 12], &device);

        let (ca, cb) = center_crop_to_smallest(a, b, [1, 2], [1, 2]);
        assert_eq!(ca.dims(), [1, 10, 12]);
        assert_eq!(cb.dims(), [1, 10, 12]);
    }

    #[test]
    fn test_smaller_target_is_left_alone() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::zeros([1, 8, 8], &device);
        let cropped = center_crop(x, [1, 2], [12, 12]);
        assert_eq!(cropped.dims(), [1, 8, 8]);
    }
}
