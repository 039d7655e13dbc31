//! Reconstruction loss processing.
//!
//! The orchestrators emit either a single post-processed prediction or the
//! full cascade/time-step history; the functions here turn either into a
//! scalar training loss. Everything is a direct function of its inputs: the
//! weighting schedule, the normalization statistics and the loss kind are all
//! explicit arguments, with no module-level defaults.

use std::collections::HashMap;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use rmri_core::coil::sense_expand;
use rmri_core::complex::complex_abs;
use rmri_core::fourier::{fft2, FftSpec};

use crate::error::ModelError;

/// Element-wise comparison applied after domain processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    L1,
    Mse,
}

impl Default for LossKind {
    fn default() -> Self {
        Self::L1
    }
}

/// How the data-loading pipeline normalized its tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationType {
    MinMax,
    ZScore,
}

/// Pre-normalization statistics of one tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

/// Resolve the `min`/`max`/`mean`/`std` statistics recorded under `prefix`.
///
/// Each statistic is looked up under its plain key (`{prefix}_{stat}`) first
/// and falls back to the variant keyed by the acceleration factor
/// (`{prefix}_{stat}_{r}`), the convention used by self-supervised runs that
/// store separate statistics per acceleration.
pub fn normalization_stats(
    attributes: &HashMap<String, f64>,
    prefix: &str,
    r: usize,
) -> crate::error::Result<NormalizationStats> {
    let get = |stat: &str| -> crate::error::Result<f64> {
        let key = format!("{prefix}_{stat}");
        if let Some(value) = attributes.get(&key) {
            return Ok(*value);
        }
        let keyed = format!("{prefix}_{stat}_{r}");
        attributes.get(&keyed).copied().ok_or_else(|| {
            ModelError::missing_input(format!(
                "normalization statistic `{key}` (or `{keyed}`)"
            ))
        })
    };
    Ok(NormalizationStats {
        min: get("min")?,
        max: get("max")?,
        mean: get("mean")?,
        std: get("std")?,
    })
}

/// Invert the data-loading normalization.
pub fn unnormalize<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    stats: &NormalizationStats,
    kind: NormalizationType,
) -> Tensor<B, D> {
    match kind {
        NormalizationType::MinMax => x.mul_scalar(stats.max - stats.min).add_scalar(stats.min),
        NormalizationType::ZScore => x.mul_scalar(stats.std).add_scalar(stats.mean),
    }
}

/// Log-spaced supervision weights from 0.1 to 1.0, one per time-step.
pub fn logspace_weights(steps: usize) -> Vec<f64> {
    if steps <= 1 {
        return vec![1.0; steps];
    }
    (0..steps)
        .map(|i| 10f64.powf(-1.0 + i as f64 / (steps as f64 - 1.0)))
        .collect()
}

/// Configuration for the loss-processing functions.
#[derive(Config, Debug)]
pub struct ReconstructionLossConfig {
    /// Element-wise comparison.
    #[config(default = "LossKind::L1")]
    pub kind: LossKind,
    /// Compare in k-space (re-expand through the sensitivity maps and
    /// transform) instead of magnitude image space.
    #[config(default = false)]
    pub kspace_loss: bool,
    /// Restrict the k-space comparison to sampled locations.
    #[config(default = false)]
    pub mask_kspace_loss: bool,
    /// Scale on the final loss value.
    #[config(default = 1.0)]
    pub regularization_factor: f64,
    /// Spectral transform convention for the k-space comparison.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

fn elementwise<B: Backend, const D: usize>(
    kind: LossKind,
    x: Tensor<B, D>,
    y: Tensor<B, D>,
) -> Tensor<B, 1> {
    match kind {
        LossKind::L1 => (x - y).abs().mean(),
        LossKind::Mse => (x - y).powf_scalar(2.0).mean(),
    }
}

/// Magnitude image scaled to a unit peak.
fn normalized_magnitude<B: Backend>(x: &Tensor<B, 4>) -> Tensor<B, 3> {
    let magnitude: Tensor<B, 3> = complex_abs(x.clone());
    let peak = magnitude.clone().max().clamp_min(1e-12).reshape([1, 1, 1]);
    magnitude / peak
}

/// Loss between one post-processed prediction and the target, both
/// `[batch, x, y, 2]`.
///
/// The image-domain path compares peak-normalized magnitudes; the k-space
/// path re-expands both operands to multi-coil k-space and compares the
/// complex pairs, optionally only at sampled locations.
pub fn reconstruction_loss<B: Backend>(
    config: &ReconstructionLossConfig,
    target: &Tensor<B, 4>,
    prediction: &Tensor<B, 4>,
    sensitivity_maps: Option<&Tensor<B, 5>>,
    mask: Option<&Tensor<B, 5>>,
) -> crate::error::Result<Tensor<B, 1>> {
    if !config.kspace_loss {
        return Ok(elementwise(
            config.kind,
            normalized_magnitude(target),
            normalized_magnitude(prediction),
        ));
    }

    let maps = sensitivity_maps.ok_or_else(|| {
        ModelError::missing_input("sensitivity maps are required for the k-space loss")
    })?;
    let expand = |image: &Tensor<B, 4>| -> crate::error::Result<Tensor<B, 5>> {
        let mut kspace = fft2(sense_expand(image.clone(), maps.clone(), 1), &config.fft);
        if config.mask_kspace_loss {
            let mask = mask.ok_or_else(|| {
                ModelError::missing_input("a sampling mask is required to mask the k-space loss")
            })?;
            kspace = kspace * mask.clone();
        }
        Ok(kspace)
    };

    Ok(elementwise(config.kind, expand(target)?, expand(prediction)?))
}

/// Accumulated loss over a cascade/time-step history, the multi-term
/// supervision policy of the recurrent-inference orchestrators.
///
/// Every time-step contributes with a log-spaced weight (0.1 up to 1.0 at
/// the final step), summed and averaged by time-step count, then averaged
/// over cascades and scaled by the regularization factor.
pub fn cascades_time_steps_loss<B: Backend>(
    config: &ReconstructionLossConfig,
    target: &Tensor<B, 4>,
    history: &[Vec<Tensor<B, 4>>],
    sensitivity_maps: Option<&Tensor<B, 5>>,
    mask: Option<&Tensor<B, 5>>,
) -> crate::error::Result<Tensor<B, 1>> {
    if history.is_empty() || history.iter().any(|steps| steps.is_empty()) {
        return Err(ModelError::missing_input(
            "an accumulated loss needs a non-empty prediction history",
        ));
    }

    let mut total: Option<Tensor<B, 1>> = None;
    for steps in history {
        let weights = logspace_weights(steps.len());
        let mut cascade_sum: Option<Tensor<B, 1>> = None;
        for (prediction, weight) in steps.iter().zip(weights) {
            let step_loss =
                reconstruction_loss(config, target, prediction, sensitivity_maps, mask)?
                    .mul_scalar(weight);
            cascade_sum = Some(match cascade_sum {
                Some(sum) => sum + step_loss,
                None => step_loss,
            });
        }
        let cascade_loss = cascade_sum
            .expect("non-empty step sequence")
            .div_scalar(steps.len() as f64);
        total = Some(match total {
            Some(sum) => sum + cascade_loss,
            None => cascade_loss,
        });
    }

    Ok(total
        .expect("non-empty history")
        .div_scalar(history.len() as f64)
        .mul_scalar(config.regularization_factor))
}

/// Per-sample attributes accompanying a self-supervised batch.
#[derive(Debug, Clone, Default)]
pub struct LossAttributes {
    /// Pre-normalization statistics, keyed as `{prefix}_{stat}` with
    /// optional `_{r}` suffixes per acceleration factor.
    pub stats: HashMap<String, f64>,
    /// The sample carries ground-truth supervision.
    pub n2r_supervised: bool,
}

/// Undo the data-loading normalization on a (target, prediction) pair before
/// comparison, using the statistics recorded for the acceleration factor `r`.
///
/// Noise-to-reconstruction samples without supervision compare against the
/// noisy prediction statistics; supervised samples use the target's own.
pub fn unnormalize_loss_inputs<B: Backend>(
    target: Tensor<B, 4>,
    prediction: Tensor<B, 4>,
    attributes: &LossAttributes,
    r: usize,
    n2r: bool,
    kind: NormalizationType,
) -> crate::error::Result<(Tensor<B, 4>, Tensor<B, 4>)> {
    if n2r && !attributes.n2r_supervised {
        let target_stats = normalization_stats(&attributes.stats, "prediction", r)?;
        let prediction_stats = normalization_stats(&attributes.stats, "noise_prediction", r)?;
        Ok((
            unnormalize(target, &target_stats, kind),
            unnormalize(prediction, &prediction_stats, kind),
        ))
    } else {
        let target_stats = normalization_stats(&attributes.stats, "target", r)?;
        let prediction_stats = normalization_stats(&attributes.stats, "prediction", r)?;
        Ok((
            unnormalize(target, &target_stats, kind),
            unnormalize(prediction, &prediction_stats, kind),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_logspace_endpoints() {
        let weights = logspace_weights(8);
        assert_eq!(weights.len(), 8);
        assert!((weights[0] - 0.1).abs() < 1e-12);
        assert!((weights[7] - 1.0).abs() < 1e-12);
        assert!(weights.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_stats_lookup_prefers_plain_key() {
        let mut attrs = HashMap::new();
        attrs.insert("prediction_min".to_string(), 0.0);
        attrs.insert("prediction_max".to_string(), 2.0);
        attrs.insert("prediction_mean".to_string(), 1.0);
        attrs.insert("prediction_std".to_string(), 0.5);
        attrs.insert("prediction_std_4".to_string(), 9.0);

        let stats = normalization_stats(&attrs, "prediction", 4).unwrap();
        assert_eq!(stats.std, 0.5);
    }

    #[test]
    fn test_stats_lookup_falls_back_to_acceleration_key() {
        let mut attrs = HashMap::new();
        for stat in ["min", "max", "mean", "std"] {
            attrs.insert(format!("noise_prediction_{stat}_8"), 1.0);
        }

        let stats = normalization_stats(&attrs, "noise_prediction", 8).unwrap();
        assert_eq!(stats.mean, 1.0);

        let err = normalization_stats(&attrs, "noise_prediction", 4).unwrap_err();
        assert!(err.to_string().contains("noise_prediction_min"));
    }

    #[test]
    fn test_identical_prediction_has_zero_loss() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 4>::random(
            [1, 8, 8, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let config = ReconstructionLossConfig::new();
        let loss = reconstruction_loss(&config, &target, &target.clone(), None, None).unwrap();
        assert!(loss.into_scalar() < 1e-7);
    }

    #[test]
    fn test_accumulated_loss_averages_cascades() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 4>::random(
            [1, 8, 8, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let prediction = Tensor::<TestBackend, 4>::random(
            [1, 8, 8, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let config = ReconstructionLossConfig::new();
        let one = cascades_time_steps_loss(
            &config,
            &target,
            &[vec![prediction.clone()]],
            None,
            None,
        )
        .unwrap()
        .into_scalar();
        // Duplicating the cascade leaves the average unchanged.
        let two = cascades_time_steps_loss(
            &config,
            &target,
            &[vec![prediction.clone()], vec![prediction]],
            None,
            None,
        )
        .unwrap()
        .into_scalar();
        assert!((one - two).abs() < 1e-6);
    }

    #[test]
    fn test_kspace_loss_requires_maps() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 4>::zeros([1, 4, 4, 2], &device);

        let config = ReconstructionLossConfig::new().with_kspace_loss(true);
        let err = reconstruction_loss(&config, &target, &target.clone(), None, None).unwrap_err();
        assert!(err.to_string().contains("sensitivity maps"));
    }

    #[test]
    fn test_n2r_inputs_use_noise_statistics_when_unsupervised() {
        let device = Default::default();
        let mut attrs = LossAttributes::default();
        for stat in ["min", "max", "mean", "std"] {
            attrs.stats.insert(format!("prediction_{stat}"), 1.0);
            attrs.stats.insert(format!("noise_prediction_{stat}_4"), 2.0);
            attrs.stats.insert(format!("target_{stat}"), 3.0);
        }

        let x = Tensor::<TestBackend, 4>::ones([1, 2, 2, 2], &device);

        // Unsupervised: prediction side resolves the noise statistics.
        let (_, prediction) = unnormalize_loss_inputs(
            x.clone(),
            x.clone(),
            &attrs,
            4,
            true,
            NormalizationType::ZScore,
        )
        .unwrap();
        let value = prediction.max().into_scalar();
        assert!((value - 4.0).abs() < 1e-6); // 1 * std(2) + mean(2)

        // Supervised: target statistics apply to the target side.
        attrs.n2r_supervised = true;
        let (target, _) = unnormalize_loss_inputs(
            x.clone(),
            x,
            &attrs,
            4,
            true,
            NormalizationType::ZScore,
        )
        .unwrap();
        let value = target.max().into_scalar();
        assert!((value - 6.0).abs() < 1e-6); // 1 * std(3) + mean(3)
    }

    #[test]
    fn test_unnormalize_minmax_round_trip() {
        let device = Default::default();
        let stats = NormalizationStats {
            min: -2.0,
            max: 3.0,
            mean: 0.0,
            std: 1.0,
        };
        let x = Tensor::<TestBackend, 4>::random(
            [1, 4, 4, 2],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let restored = unnormalize(x.clone(), &stats, NormalizationType::MinMax);
        let expected = x.mul_scalar(5.0).sub_scalar(2.0);
        let diff = (restored - expected).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }
}
