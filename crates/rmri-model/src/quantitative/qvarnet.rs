//! Quantitative variational cascade and orchestrator.

use burn::module::{Ignored, Param};
use burn::prelude::*;

use rmri_core::coil::{coil_combination, CoilCombinationMethod};
use rmri_core::complex::{complex_abs, complex_conj, complex_mul};
use rmri_core::fourier::{fft2, ifft2, FftSpec};

use crate::blocks::{ConvDenoiser, ConvDenoiserConfig};
use crate::error::ModelError;
use crate::quantitative::mapping::r2star_b0_s0_phi_mapping;
use crate::quantitative::rescale::GammaRescale;
use crate::quantitative::signal::{SignalForwardModel, SignalSequence};
use crate::reconstruction::varnet::{VarNetBlock, VarNetBlockConfig};
use crate::validation;

/// The four quantitative parameter maps, each `[batch, x, y]`.
#[derive(Debug, Clone)]
pub struct QuantitativeMaps<B: Backend> {
    pub r2star: Tensor<B, 3>,
    pub s0: Tensor<B, 3>,
    pub b0: Tensor<B, 3>,
    pub phi: Tensor<B, 3>,
}

impl<B: Backend> QuantitativeMaps<B> {
    /// Stack into the `[batch, 4, x, y]` layout the cascades consume.
    pub fn stack(&self) -> Tensor<B, 4> {
        Tensor::stack(
            vec![
                self.r2star.clone(),
                self.s0.clone(),
                self.b0.clone(),
                self.phi.clone(),
            ],
            1,
        )
    }

    /// Split a `[batch, 4, x, y]` stack back into named maps.
    pub fn from_stack(stack: Tensor<B, 4>) -> Self {
        let channel = |i: usize| -> Tensor<B, 3> { stack.clone().narrow(1, i, 1).squeeze(1) };
        Self {
            r2star: channel(0),
            s0: channel(1),
            b0: channel(2),
            phi: channel(3),
        }
    }
}

/// Configuration for [`QVarNetBlock`].
#[derive(Config, Debug)]
pub struct QVarNetBlockConfig {
    /// Map-domain denoiser; consumes the 8-channel (maps, correction) stack
    /// and produces a 4-map complex stack (8 channels).
    pub denoiser: ConvDenoiserConfig,
    /// Signal model sequence.
    #[config(default = "SignalSequence::Megre")]
    pub sequence: SignalSequence,
    /// Skip the per-channel blend toward the incoming maps.
    #[config(default = false)]
    pub no_dc: bool,
    /// Spectral transform convention.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

impl QVarNetBlockConfig {
    /// Initialize the block on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> QVarNetBlock<B> {
        QVarNetBlock {
            denoiser: self.denoiser.init(device),
            dc_weight: Param::from_tensor(Tensor::ones([1], device)),
            signal_model: Ignored(SignalForwardModel::new(self.sequence)),
            no_dc: Ignored(self.no_dc),
            fft: Ignored(self.fft),
        }
    }
}

/// One quantitative inference iteration.
///
/// Synthesizes the expected per-echo signal from the current (normalized) map
/// estimate, measures the k-space residual against the acquisition, projects
/// it back to parameter space through the signal model's analytic adjoint,
/// and feeds the concatenated (maps, correction) stack through the denoiser.
/// The updated maps come back as a complex stack `[batch, 4, x, y, 2]`;
/// unless `no_dc` is set they are softly blended toward the incoming maps,
/// per channel, with a learned per-cascade weight.
#[derive(Module, Debug)]
pub struct QVarNetBlock<B: Backend> {
    pub denoiser: ConvDenoiser<B>,
    pub dc_weight: Param<Tensor<B, 1>>,
    pub signal_model: Ignored<SignalForwardModel>,
    pub no_dc: Ignored<bool>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> QVarNetBlock<B> {
    /// Refine the normalized map stack against the measurement.
    ///
    /// * `measurement` - `[batch, echo, coil, x, y, 2]`.
    /// * `maps` - normalized stack, `[batch, 4, x, y]`.
    /// * `sensitivity_maps` - `[batch, coil, x, y, 2]`.
    /// * `sampling_mask` - `[batch | 1, 1, x, y, 1]`.
    pub fn forward(
        &self,
        measurement: &Tensor<B, 6>,
        maps: &Tensor<B, 4>,
        echo_times: &[f64],
        sensitivity_maps: &Tensor<B, 5>,
        sampling_mask: &Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let channel = |i: usize| -> Tensor<B, 3> { maps.clone().narrow(1, i, 1).squeeze(1) };
        let (r2star, s0, b0, phi) = (channel(0), channel(1), channel(2), channel(3));

        let synthesized =
            self.signal_model
                .forward(&r2star, &s0, &b0, &phi, echo_times);
        let synthesized_kspace = fft2(
            complex_mul(
                synthesized.unsqueeze_dim(2),
                sensitivity_maps.clone().unsqueeze_dim(1),
            ),
            &self.fft,
        );

        let mask: Tensor<B, 6> = sampling_mask.clone().unsqueeze_dim(1);
        let residual_kspace = (synthesized_kspace - measurement.clone()) * mask;
        let residual: Tensor<B, 5> = complex_mul(
            ifft2(residual_kspace, &self.fft),
            complex_conj(sensitivity_maps.clone()).unsqueeze_dim(1),
        )
        .sum_dim(2)
        .squeeze(2);

        let correction = self
            .signal_model
            .gradient(&residual, &r2star, &s0, &b0, &phi, echo_times);

        let update = self
            .denoiser
            .forward(Tensor::cat(vec![maps.clone(), correction], 1));
        let [batch, _, height, width] = update.dims();
        let update: Tensor<B, 5> = update
            .reshape([batch, 4, 2, height, width])
            .permute([0, 1, 3, 4, 2]);

        if *self.no_dc {
            update
        } else {
            let incoming: Tensor<B, 5> =
                Tensor::stack(vec![maps.clone(), maps.zeros_like()], 4);
            let weight = self.dc_weight.val().reshape([1; 5]);
            update.clone() - (update - incoming) * weight
        }
    }
}

/// Orchestrator output.
#[derive(Debug, Clone)]
pub struct QVarNetOutput<B: Backend> {
    /// Combined multi-echo reconstruction, `[batch, echo, x, y, 2]`, present
    /// when the reconstruction sub-pipeline is configured.
    pub reconstruction: Option<Tensor<B, 5>>,
    /// De-normalized final parameter maps.
    pub maps: QuantitativeMaps<B>,
    /// Per-cascade normalized magnitude stacks, retained when accumulation
    /// is configured.
    pub intermediates: Option<Vec<Tensor<B, 4>>>,
}

/// Configuration for [`QVarNet`].
#[derive(Config, Debug)]
pub struct QVarNetConfig {
    /// Spatial dimensionality; only 2 is supported.
    #[config(default = 2)]
    pub dimensionality: usize,
    /// Number of quantitative cascades.
    #[config(default = 4)]
    pub num_cascades: usize,
    /// Quantitative map denoiser (8 channels in, 8 out).
    pub denoiser: ConvDenoiserConfig,
    /// Signal model sequence name.
    #[config(default = "String::from(\"megre\")")]
    pub signal_model_sequence: String,
    /// Disable the per-channel blend in every cascade.
    #[config(default = false)]
    pub no_dc: bool,
    /// Retain every cascade's map stack for supervision.
    #[config(default = false)]
    pub accumulate_predictions: bool,
    /// Per-map scale factors (R2*, S0, B0, phi).
    #[config(default = "[150.0, 150.0, 1000.0, 100.0]")]
    pub gamma: [f64; 4],
    /// Run a per-echo reconstruction sub-pipeline and re-estimate the
    /// initial maps from its output.
    #[config(default = false)]
    pub use_reconstruction_module: bool,
    /// Cascades of the reconstruction sub-pipeline.
    #[config(default = 2)]
    pub reconstruction_num_cascades: usize,
    /// Denoiser of the reconstruction sub-pipeline (2 channels in, 2 out);
    /// required when the sub-pipeline is enabled.
    pub reconstruction_denoiser: Option<ConvDenoiserConfig>,
    /// Disable data consistency in the reconstruction sub-pipeline.
    #[config(default = false)]
    pub reconstruction_no_dc: bool,
    /// Coil combination applied by the reconstruction sub-pipeline.
    #[config(default = "CoilCombinationMethod::Sense")]
    pub coil_combination: CoilCombinationMethod,
    /// Spectral transform convention.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

/// Quantitative orchestrator.
///
/// Optionally reconstructs each echo with a stack of plain variational
/// cascades, re-synthesizes the measurement from the combined echoes and
/// seeds the map estimates through the closed-form physics fit; then runs the
/// quantitative cascades on the gamma-normalized map stack, taking the
/// magnitude of the complex stack between cascades and de-normalizing once
/// after the last one.
#[derive(Module, Debug)]
pub struct QVarNet<B: Backend> {
    pub reconstruction_cascades: Vec<VarNetBlock<B>>,
    pub cascades: Vec<QVarNetBlock<B>>,
    pub gamma: Ignored<GammaRescale>,
    pub accumulate_predictions: Ignored<bool>,
    pub coil_combination: Ignored<CoilCombinationMethod>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> QVarNet<B> {
    /// Build the orchestrator. The dimensionality check is fatal here, never
    /// at forward-pass time.
    pub fn new(config: &QVarNetConfig, device: &B::Device) -> crate::error::Result<Self> {
        if config.dimensionality != 2 {
            return Err(ModelError::invalid_configuration(format!(
                "only 2D is supported for quantitative models, got {}",
                config.dimensionality
            )));
        }
        if config.num_cascades == 0 {
            return Err(ModelError::invalid_configuration(
                "`num_cascades` must be at least 1",
            ));
        }
        if config.denoiser.in_channels != 8 || config.denoiser.out_channels != 8 {
            return Err(ModelError::invalid_configuration(format!(
                "the quantitative denoiser consumes the (maps, correction) stack and produces \
                 a 4-map complex stack, so it needs 8 input and 8 output channels, got {} and {}",
                config.denoiser.in_channels, config.denoiser.out_channels
            )));
        }
        let sequence = SignalSequence::from_name(&config.signal_model_sequence)?;

        let reconstruction_cascades = if config.use_reconstruction_module {
            let denoiser = config.reconstruction_denoiser.clone().ok_or_else(|| {
                ModelError::invalid_configuration(
                    "`reconstruction_denoiser` is required when the reconstruction module is \
                     enabled",
                )
            })?;
            if denoiser.in_channels != 2 || denoiser.out_channels != 2 {
                return Err(ModelError::invalid_configuration(
                    "the reconstruction denoiser maps a complex image, so it needs 2 input and \
                     2 output channels",
                ));
            }
            let block = VarNetBlockConfig::new(denoiser)
                .with_no_dc(config.reconstruction_no_dc)
                .with_fft(config.fft);
            (0..config.reconstruction_num_cascades)
                .map(|_| block.init(device))
                .collect()
        } else {
            Vec::new()
        };

        let block = QVarNetBlockConfig::new(config.denoiser.clone())
            .with_sequence(sequence)
            .with_no_dc(config.no_dc)
            .with_fft(config.fft);
        let cascades = (0..config.num_cascades)
            .map(|_| block.init(device))
            .collect();

        Ok(Self {
            reconstruction_cascades,
            cascades,
            gamma: Ignored(GammaRescale::new(config.gamma)),
            accumulate_predictions: Ignored(config.accumulate_predictions),
            coil_combination: Ignored(config.coil_combination),
            fft: Ignored(config.fft),
        })
    }

    /// Forward pass.
    ///
    /// * `measurement` - subsampled k-space, `[batch, echo, coil, x, y, 2]`.
    /// * `sensitivity_maps` - `[batch, coil, x, y, 2]`.
    /// * `brain_mask` - `[batch, 1, x, y, 1]`.
    /// * `sampling_mask` - `[batch | 1, 1, x, y, 1]`.
    /// * `echo_times` - one entry per echo, in seconds.
    /// * `initial_maps` - required unless the reconstruction module
    ///   re-estimates them (checked here, at the point of use).
    pub fn forward(
        &self,
        measurement: &Tensor<B, 6>,
        sensitivity_maps: &Tensor<B, 5>,
        brain_mask: &Tensor<B, 5>,
        sampling_mask: &Tensor<B, 5>,
        echo_times: &[f64],
        initial_maps: Option<&QuantitativeMaps<B>>,
    ) -> crate::error::Result<QVarNetOutput<B>> {
        validation::validate_complex_pair("measurement", measurement)?;
        validation::validate_complex_pair("sensitivity_maps", sensitivity_maps)?;
        validation::validate_mask("brain_mask", brain_mask)?;
        validation::validate_mask("sampling_mask", sampling_mask)?;
        let [_, num_echoes, _, height, width, _] = measurement.dims();
        let map_dims = sensitivity_maps.dims();
        validation::validate_spatial_match(
            "sensitivity_maps",
            [height, width],
            [map_dims[2], map_dims[3]],
        )?;
        if num_echoes != echo_times.len() {
            return Err(ModelError::shape_mismatch(
                "echo_times",
                vec![num_echoes],
                vec![echo_times.len()],
            ));
        }

        let (working_measurement, reconstruction, initial) = if self
            .reconstruction_cascades
            .is_empty()
        {
            let maps = initial_maps.ok_or_else(|| {
                ModelError::missing_input(
                    "initial quantitative maps are required when the reconstruction module is \
                     disabled",
                )
            })?;
            (measurement.clone(), None, maps.clone())
        } else {
            let mut echoes: Vec<Tensor<B, 4>> = Vec::with_capacity(num_echoes);
            for echo in 0..num_echoes {
                let echo_measurement: Tensor<B, 5> =
                    measurement.clone().narrow(1, echo, 1).squeeze(1);
                let mut prediction = echo_measurement.clone();
                for cascade in &self.reconstruction_cascades {
                    prediction = cascade.forward(
                        prediction,
                        &echo_measurement,
                        sensitivity_maps,
                        sampling_mask,
                    );
                }
                echoes.push(coil_combination(
                    ifft2(prediction, &self.fft),
                    sensitivity_maps.clone(),
                    *self.coil_combination,
                    1,
                ));
            }
            let reconstruction: Tensor<B, 5> = Tensor::stack(echoes, 1);

            // The refined echoes replace the acquisition for the
            // quantitative cascades.
            let resynthesized = fft2(
                complex_mul(
                    reconstruction.clone().unsqueeze_dim(2),
                    sensitivity_maps.clone().unsqueeze_dim(1),
                ),
                &self.fft,
            );

            let (r2star, s0, b0, phi) =
                r2star_b0_s0_phi_mapping(&reconstruction, echo_times, brain_mask);
            (
                resynthesized,
                Some(reconstruction),
                QuantitativeMaps { r2star, s0, b0, phi },
            )
        };

        let mut maps = self.gamma.forward(initial.stack());
        let mut history = Vec::with_capacity(self.cascades.len());
        let mut complex_stack: Option<Tensor<B, 5>> = None;
        for cascade in &self.cascades {
            let prediction = cascade.forward(
                &working_measurement,
                &maps,
                echo_times,
                sensitivity_maps,
                sampling_mask,
            );
            maps = complex_abs(prediction.clone());
            if *self.accumulate_predictions {
                history.push(maps.clone());
            }
            complex_stack = Some(prediction);
        }

        let final_magnitude: Tensor<B, 4> =
            complex_abs(complex_stack.expect("at least one cascade ran"));
        let descaled = self.gamma.reverse(final_magnitude);

        Ok(QVarNetOutput {
            reconstruction,
            maps: QuantitativeMaps::from_stack(descaled),
            intermediates: (*self.accumulate_predictions).then_some(history),
        })
    }
}
