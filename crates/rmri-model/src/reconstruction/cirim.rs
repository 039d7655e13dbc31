//! Cascades of independently recurrent inference machines.

use burn::module::Ignored;
use burn::prelude::*;

use rmri_core::coil::{coil_combination, CoilCombinationMethod};
use rmri_core::crop::center_crop_to_smallest;
use rmri_core::fourier::{ifft2, FftSpec};

use crate::blocks::{ConvRnnStackConfig, HiddenState};
use crate::error::ModelError;
use crate::reconstruction::rim::{RimBlock, RimBlockConfig, RimPrediction};
use crate::validation;

/// Orchestrator output, selected by the accumulation flag.
///
/// `Cascades` holds one post-processed `[batch, x, y, 2]` prediction per
/// time-step per cascade, ordered cascade-major; the very last entry is the
/// final prediction.
#[derive(Debug, Clone)]
pub enum CirimOutput<B: Backend> {
    Final(Tensor<B, 4>),
    Cascades(Vec<Vec<Tensor<B, 4>>>),
}

impl<B: Backend> CirimOutput<B> {
    /// The prediction consumed by callers that only want the end result.
    pub fn final_prediction(&self) -> &Tensor<B, 4> {
        match self {
            Self::Final(prediction) => prediction,
            Self::Cascades(history) => history
                .last()
                .and_then(|steps| steps.last())
                .expect("cascade history is never empty"),
        }
    }
}

/// Configuration for [`Cirim`].
#[derive(Config, Debug)]
pub struct CirimConfig {
    /// Number of cascades, each with independent parameters.
    #[config(default = 8)]
    pub num_cascades: usize,
    /// Internal time-steps per cascade; rounded up to a multiple of 8 at
    /// construction for fast reduced-precision kernels.
    pub time_steps: usize,
    /// Carry the running estimate across cascades (never on the first).
    #[config(default = true)]
    pub keep_prediction: bool,
    /// Emit raw image estimates instead of soft-blended k-space.
    #[config(default = false)]
    pub no_dc: bool,
    /// Retain every time-step of every cascade for supervision.
    #[config(default = false)]
    pub accumulate_predictions: bool,
    /// Interleaved conv/GRU stack shared structurally by all cascades.
    pub stack: ConvRnnStackConfig,
    /// Coil combination applied during post-processing.
    #[config(default = "CoilCombinationMethod::Sense")]
    pub coil_combination: CoilCombinationMethod,
    /// Spectral transform convention.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

/// Cascade orchestrator for recurrent inference machines.
///
/// Threads the raw prediction sequence and the recurrent hidden state from
/// cascade to cascade, post-processing every retained time-step into a
/// cropped complex image.
#[derive(Module, Debug)]
pub struct Cirim<B: Backend> {
    pub cascades: Vec<RimBlock<B>>,
    pub time_steps: usize,
    pub keep_prediction: Ignored<bool>,
    pub no_dc: Ignored<bool>,
    pub accumulate_predictions: Ignored<bool>,
    pub coil_combination: Ignored<CoilCombinationMethod>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> Cirim<B> {
    /// Build the orchestrator; configuration errors are fatal here.
    pub fn new(config: &CirimConfig, device: &B::Device) -> crate::error::Result<Self> {
        if config.num_cascades == 0 {
            return Err(ModelError::invalid_configuration(
                "`num_cascades` must be at least 1",
            ));
        }
        if config.time_steps == 0 {
            return Err(ModelError::invalid_configuration(
                "`time_steps` must be at least 1",
            ));
        }
        if config.stack.in_channels != 4 {
            return Err(ModelError::invalid_configuration(format!(
                "the recurrent stack consumes the (estimate, gradient) pair, so it needs 4 \
                 input channels, got {}",
                config.stack.in_channels
            )));
        }
        if config.stack.conv_filters.last() != Some(&2) {
            return Err(ModelError::invalid_configuration(
                "the recurrent stack must end in a 2-channel correction stage",
            ));
        }

        let time_steps = 8 * config.time_steps.div_ceil(8);
        let block = RimBlockConfig::new(config.stack.clone(), time_steps)
            .with_no_dc(config.no_dc)
            .with_fft(config.fft);
        let cascades = (0..config.num_cascades)
            .map(|_| block.init(device))
            .collect();

        Ok(Self {
            cascades,
            time_steps,
            keep_prediction: Ignored(config.keep_prediction),
            no_dc: Ignored(config.no_dc),
            accumulate_predictions: Ignored(config.accumulate_predictions),
            coil_combination: Ignored(config.coil_combination),
            fft: Ignored(config.fft),
        })
    }

    /// Forward pass.
    ///
    /// * `measurement` - subsampled k-space, `[batch, coil, x, y, 2]`.
    /// * `sensitivity_maps` - `[batch, coil, x, y, 2]`.
    /// * `mask` - sampling pattern, `[batch | 1, 1, x, y, 1]`.
    /// * `init_prediction` - optional starting image, `[batch, x, y, 2]`.
    /// * `target` - `[batch, x, y, 2]`, used for crop-matching only.
    ///
    /// Returns every time-step of every cascade when accumulation is
    /// configured, the final prediction otherwise.
    pub fn forward(
        &self,
        measurement: &Tensor<B, 5>,
        sensitivity_maps: &Tensor<B, 5>,
        mask: &Tensor<B, 5>,
        init_prediction: Option<&Tensor<B, 4>>,
        target: &Tensor<B, 4>,
    ) -> crate::error::Result<CirimOutput<B>> {
        validation::validate_complex_pair("measurement", measurement)?;
        validation::validate_complex_pair("sensitivity_maps", sensitivity_maps)?;
        validation::validate_complex_pair("target", target)?;
        validation::validate_mask("mask", mask)?;
        validation::validate_batch_match(
            "sensitivity_maps",
            measurement.dims()[0],
            sensitivity_maps.dims()[0],
        )?;

        let sigma = 1.0;
        let mut raw: Option<RimPrediction<B>> = None;
        let mut hidden: Option<HiddenState<B>> = None;
        let mut history: Vec<Vec<Tensor<B, 4>>> = Vec::with_capacity(self.cascades.len());

        for (i, cascade) in self.cascades.iter().enumerate() {
            let keep = i > 0 && *self.keep_prediction;
            let (prediction, next_hidden) = cascade.forward(
                raw.as_ref(),
                measurement,
                sensitivity_maps,
                mask,
                init_prediction,
                hidden.take(),
                sigma,
                keep,
            );
            hidden = Some(next_hidden);
            history.push(self.process_intermediate(&prediction, sensitivity_maps, target));
            raw = Some(prediction);
        }

        if *self.accumulate_predictions {
            Ok(CirimOutput::Cascades(history))
        } else {
            let last = history
                .last()
                .and_then(|steps| steps.last())
                .expect("at least one cascade ran")
                .clone();
            Ok(CirimOutput::Final(last))
        }
    }

    /// Convert a cascade's raw sequence into cropped complex images; k-space
    /// sequences are inverse-transformed and coil-combined first.
    fn process_intermediate(
        &self,
        prediction: &RimPrediction<B>,
        sensitivity_maps: &Tensor<B, 5>,
        target: &Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        match prediction {
            RimPrediction::KSpace(sequence) => sequence
                .iter()
                .map(|kspace| {
                    let image: Tensor<B, 4> = coil_combination(
                        ifft2(kspace.clone(), &self.fft),
                        sensitivity_maps.clone(),
                        *self.coil_combination,
                        1,
                    );
                    let (_, cropped) =
                        center_crop_to_smallest(target.clone(), image, [1, 2], [1, 2]);
                    cropped
                })
                .collect(),
            RimPrediction::Image(sequence) => sequence
                .iter()
                .map(|image| {
                    let (_, cropped) =
                        center_crop_to_smallest(target.clone(), image.clone(), [1, 2], [1, 2]);
                    cropped
                })
                .collect(),
        }
    }
}
