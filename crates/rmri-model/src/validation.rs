//! Eager input validation for orchestrator forward passes.
//!
//! Orchestrators run these checks before touching the cascades so malformed
//! inputs fail fast with a message naming the offending field, instead of
//! deep inside a tensor kernel.

use burn::tensor::{backend::Backend, Tensor};

use crate::error::{ModelError, Result};

/// Require a trailing real/imaginary axis of size 2.
pub fn validate_complex_pair<B: Backend, const D: usize>(
    field: &str,
    tensor: &Tensor<B, D>,
) -> Result<()> {
    let dims = tensor.dims();
    if dims[D - 1] != 2 {
        return Err(ModelError::domain_mismatch(format!(
            "`{field}` must carry a trailing real/imaginary axis of size 2, got {}",
            dims[D - 1]
        )));
    }
    Ok(())
}

/// Require a trailing axis of size 1, the mask convention.
pub fn validate_mask<B: Backend, const D: usize>(
    field: &str,
    tensor: &Tensor<B, D>,
) -> Result<()> {
    let dims = tensor.dims();
    if dims[D - 1] != 1 {
        return Err(ModelError::domain_mismatch(format!(
            "`{field}` must carry a trailing singleton axis, got {}",
            dims[D - 1]
        )));
    }
    Ok(())
}

/// Require matching batch extents (a size-1 batch broadcasts).
pub fn validate_batch_match(
    field: &str,
    reference_batch: usize,
    batch: usize,
) -> Result<()> {
    if batch != reference_batch && batch != 1 {
        return Err(ModelError::shape_mismatch(
            field.to_string(),
            vec![reference_batch],
            vec![batch],
        ));
    }
    Ok(())
}

/// Require two spatial extents to agree between fields.
pub fn validate_spatial_match(
    field: &str,
    expected: [usize; 2],
    actual: [usize; 2],
) -> Result<()> {
    if expected != actual {
        return Err(ModelError::shape_mismatch(
            field.to_string(),
            expected.to_vec(),
            actual.to_vec(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_complex_pair_rejected() {
        let device = Default::default();
        let bad = Tensor::<TestBackend, 4>::zeros([1, 4, 4, 3], &device);
        let err = validate_complex_pair("y", &bad).unwrap_err();
        assert!(err.to_string().contains("`y`"));
    }

    #[test]
    fn test_batch_broadcast_allowed() {
        assert!(validate_batch_match("mask", 4, 1).is_ok());
        assert!(validate_batch_match("mask", 4, 4).is_ok());
        assert!(validate_batch_match("mask", 4, 2).is_err());
    }
}
