//! Plain variational cascade and the cascade-stack orchestrator.

use burn::module::Ignored;
use burn::prelude::*;

use rmri_core::coil::{coil_combination, sense_expand, sense_reduce, CoilCombinationMethod};
use rmri_core::crop::center_crop_to_smallest;
use rmri_core::fourier::{fft2, ifft2, FftSpec};

use crate::blocks::{ConvDenoiser, ConvDenoiserConfig};
use crate::consistency::SoftDataConsistency;
use crate::error::ModelError;
use crate::validation;

/// Configuration for [`VarNetBlock`].
#[derive(Config, Debug)]
pub struct VarNetBlockConfig {
    /// Image-domain denoiser; must map 2 channels to 2 channels.
    pub denoiser: ConvDenoiserConfig,
    /// Skip the data-consistency blend and pass the denoised k-space through.
    #[config(default = false)]
    pub no_dc: bool,
    /// Spectral transform convention.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

impl VarNetBlockConfig {
    /// Initialize the block on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> VarNetBlock<B> {
        VarNetBlock {
            denoiser: self.denoiser.init(device),
            dc: SoftDataConsistency::new(device),
            no_dc: Ignored(self.no_dc),
            fft: Ignored(self.fft),
        }
    }
}

/// One feed-forward inference iteration: image-domain denoising followed by a
/// soft data-consistency blend.
///
/// Accepts and returns multi-coil k-space `[batch, coil, x, y, 2]`. The block
/// carries no state between calls beyond its learned parameters.
#[derive(Module, Debug)]
pub struct VarNetBlock<B: Backend> {
    pub denoiser: ConvDenoiser<B>,
    pub dc: SoftDataConsistency<B>,
    pub no_dc: Ignored<bool>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> VarNetBlock<B> {
    /// Refine `prediction` against the measured samples.
    pub fn forward(
        &self,
        prediction: Tensor<B, 5>,
        measurement: &Tensor<B, 5>,
        sensitivity_maps: &Tensor<B, 5>,
        mask: &Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let image: Tensor<B, 4> = sense_reduce(
            ifft2(prediction, &self.fft),
            sensitivity_maps.clone(),
            1,
        );
        let denoised = self
            .denoiser
            .forward(image.permute([0, 3, 1, 2]))
            .permute([0, 2, 3, 1]);
        let denoised_kspace = fft2(
            sense_expand(denoised, sensitivity_maps.clone(), 1),
            &self.fft,
        );

        if *self.no_dc {
            denoised_kspace
        } else {
            self.dc.apply(denoised_kspace, measurement, mask)
        }
    }
}

/// Orchestrator output, selected by the accumulation flag.
///
/// `Final` is the last cascade's post-processed prediction; `Cascades` keeps
/// every cascade's post-processed prediction in order, the last entry being
/// the final one.
#[derive(Debug, Clone)]
pub enum ReconstructionOutput<B: Backend> {
    Final(Tensor<B, 4>),
    Cascades(Vec<Tensor<B, 4>>),
}

impl<B: Backend> ReconstructionOutput<B> {
    /// The prediction consumed by callers that only want the end result.
    pub fn final_prediction(&self) -> &Tensor<B, 4> {
        match self {
            Self::Final(prediction) => prediction,
            Self::Cascades(history) => history
                .last()
                .expect("cascade history is never empty"),
        }
    }
}

/// Configuration for [`VarNet`].
#[derive(Config, Debug)]
pub struct VarNetConfig {
    /// Number of cascades, each with independent parameters.
    #[config(default = 8)]
    pub num_cascades: usize,
    /// Per-cascade denoiser.
    pub denoiser: ConvDenoiserConfig,
    /// Disable data consistency in every cascade.
    #[config(default = false)]
    pub no_dc: bool,
    /// Retain every cascade's post-processed prediction for supervision.
    #[config(default = false)]
    pub accumulate_predictions: bool,
    /// Coil combination applied during finalization.
    #[config(default = "CoilCombinationMethod::Sense")]
    pub coil_combination: CoilCombinationMethod,
    /// Spectral transform convention.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

/// Cascade-stack reconstruction orchestrator.
///
/// Holds an ordered list of [`VarNetBlock`]s executed strictly sequentially,
/// each consuming the previous block's k-space output. The final prediction
/// is inverse-transformed, coil-combined and center-cropped against the
/// target extent.
#[derive(Module, Debug)]
pub struct VarNet<B: Backend> {
    pub cascades: Vec<VarNetBlock<B>>,
    pub accumulate_predictions: Ignored<bool>,
    pub coil_combination: Ignored<CoilCombinationMethod>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> VarNet<B> {
    /// Build the orchestrator; configuration errors are fatal here, not at
    /// forward-pass time.
    pub fn new(config: &VarNetConfig, device: &B::Device) -> crate::error::Result<Self> {
        if config.num_cascades == 0 {
            return Err(ModelError::invalid_configuration(
                "`num_cascades` must be at least 1",
            ));
        }
        if config.denoiser.in_channels != 2 || config.denoiser.out_channels != 2 {
            return Err(ModelError::invalid_configuration(format!(
                "the reconstruction denoiser maps a complex image, so it needs 2 input and 2 \
                 output channels, got {} and {}",
                config.denoiser.in_channels, config.denoiser.out_channels
            )));
        }

        let block = VarNetBlockConfig::new(config.denoiser.clone())
            .with_no_dc(config.no_dc)
            .with_fft(config.fft);
        let cascades = (0..config.num_cascades)
            .map(|_| block.init(device))
            .collect();

        Ok(Self {
            cascades,
            accumulate_predictions: Ignored(config.accumulate_predictions),
            coil_combination: Ignored(config.coil_combination),
            fft: Ignored(config.fft),
        })
    }

    /// Forward pass.
    ///
    /// * `measurement` - subsampled k-space, `[batch, coil, x, y, 2]`, zero
    ///   outside the sampling pattern.
    /// * `sensitivity_maps` - `[batch, coil, x, y, 2]`.
    /// * `mask` - sampling pattern, `[batch | 1, 1, x, y, 1]`.
    /// * `target` - `[batch, x, y, 2]`, used for crop-matching only.
    ///
    /// Returns every cascade's post-processed prediction when accumulation is
    /// configured, the final prediction otherwise.
    pub fn forward(
        &self,
        measurement: &Tensor<B, 5>,
        sensitivity_maps: &Tensor<B, 5>,
        mask: &Tensor<B, 5>,
        target: &Tensor<B, 4>,
    ) -> crate::error::Result<ReconstructionOutput<B>> {
        validation::validate_complex_pair("measurement", measurement)?;
        validation::validate_complex_pair("sensitivity_maps", sensitivity_maps)?;
        validation::validate_complex_pair("target", target)?;
        validation::validate_mask("mask", mask)?;
        validation::validate_batch_match(
            "sensitivity_maps",
            measurement.dims()[0],
            sensitivity_maps.dims()[0],
        )?;
        validation::validate_batch_match("mask", measurement.dims()[0], mask.dims()[0])?;

        let mut prediction = measurement.clone();
        let mut history = Vec::new();
        for cascade in &self.cascades {
            prediction = cascade.forward(prediction, measurement, sensitivity_maps, mask);
            if *self.accumulate_predictions {
                history.push(self.finalize(prediction.clone(), sensitivity_maps, target));
            }
        }

        if *self.accumulate_predictions {
            Ok(ReconstructionOutput::Cascades(history))
        } else {
            Ok(ReconstructionOutput::Final(self.finalize(
                prediction,
                sensitivity_maps,
                target,
            )))
        }
    }

    fn finalize(
        &self,
        kspace: Tensor<B, 5>,
        sensitivity_maps: &Tensor<B, 5>,
        target: &Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let image: Tensor<B, 4> = coil_combination(
            ifft2(kspace, &self.fft),
            sensitivity_maps.clone(),
            *self.coil_combination,
            1,
        );
        let (_, cropped) = center_crop_to_smallest(target.clone(), image, [1, 2], [1, 2]);
        cropped
    }
}
