//! Recurrent variational network with a learned hidden-state initializer.

use burn::module::{Ignored, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation;
use serde::{Deserialize, Serialize};

use rmri_core::coil::{coil_combination, sense_expand, sense_reduce, CoilCombinationMethod};
use rmri_core::complex::{complex_conj, complex_mul};
use rmri_core::crop::center_crop_to_smallest;
use rmri_core::fourier::{fft2, ifft2, FftSpec};

use crate::blocks::{Conv2dGru, Conv2dGruConfig, HiddenState};
use crate::error::ModelError;
use crate::validation;

/// Which starting image seeds the learned initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitializerInitialization {
    /// Sensitivity-weighted SENSE estimate of the zero-filled data.
    Sense,
    /// An externally supplied image, required per call.
    InputImage,
    /// The coil-wise zero-filled reconstruction.
    ZeroFilled,
}

impl InitializerInitialization {
    /// Parse a configured strategy name; unrecognized names are fatal.
    pub fn from_name(name: &str) -> crate::error::Result<Self> {
        match name {
            "sense" => Ok(Self::Sense),
            "input_image" => Ok(Self::InputImage),
            "zero_filled" => Ok(Self::ZeroFilled),
            other => Err(ModelError::invalid_configuration(format!(
                "unknown initializer initialization; expected `sense`, `input_image` or \
                 `zero_filled`, got `{other}`"
            ))),
        }
    }
}

/// Configuration for [`RecurrentInit`].
#[derive(Config, Debug)]
pub struct RecurrentInitConfig {
    /// Input channel count (2 for a complex k-space sum).
    pub in_channels: usize,
    /// Hidden channel width of the recurrent regularizer being initialized.
    pub hidden_channels: usize,
    /// Convolution widths of the feature extractor.
    pub channels: Vec<usize>,
    /// Dilations of the feature extractor.
    pub dilations: Vec<usize>,
    /// Number of hidden-state layers to produce.
    #[config(default = 1)]
    pub depth: usize,
    /// Concatenate the last `multiscale_depth` feature maps before the
    /// per-layer output convolutions.
    #[config(default = 1)]
    pub multiscale_depth: usize,
}

impl RecurrentInitConfig {
    /// Initialize on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RecurrentInit<B> {
        assert_eq!(
            self.channels.len(),
            self.dilations.len(),
            "initializer channels and dilations must pair up"
        );
        assert!(
            (1..=self.channels.len()).contains(&self.multiscale_depth),
            "multiscale_depth must address existing feature maps"
        );

        let mut conv_blocks = Vec::with_capacity(self.channels.len());
        let mut in_channels = self.in_channels;
        for (&out_channels, &dilation) in self.channels.iter().zip(self.dilations.iter()) {
            let padding = dilation;
            conv_blocks.push(
                Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(padding, padding))
                    .with_dilation([dilation, dilation])
                    .init(device),
            );
            in_channels = out_channels;
        }

        let fused: usize = self.channels[self.channels.len() - self.multiscale_depth..]
            .iter()
            .sum();
        let out_blocks = (0..self.depth)
            .map(|_| {
                Conv2dConfig::new([fused, self.hidden_channels], [1, 1])
                    .init(device)
            })
            .collect();

        RecurrentInit {
            conv_blocks,
            out_blocks,
            multiscale_depth: self.multiscale_depth,
        }
    }
}

/// Learned initializer producing the first hidden state from a starting
/// image, one tensor per recurrent layer.
#[derive(Module, Debug)]
pub struct RecurrentInit<B: Backend> {
    conv_blocks: Vec<Conv2d<B>>,
    out_blocks: Vec<Conv2d<B>>,
    multiscale_depth: usize,
}

impl<B: Backend> RecurrentInit<B> {
    /// `input` is `[batch, 2, x, y]`; returns `depth` hidden tensors of the
    /// configured width.
    pub fn forward(&self, input: Tensor<B, 4>) -> HiddenState<B> {
        let mut features = Vec::with_capacity(self.conv_blocks.len());
        let mut x = input;
        for conv in &self.conv_blocks {
            x = activation::relu(conv.forward(x));
            features.push(x.clone());
        }

        let fused = if self.multiscale_depth > 1 {
            Tensor::cat(
                features[features.len() - self.multiscale_depth..].to_vec(),
                1,
            )
        } else {
            x
        };

        self.out_blocks
            .iter()
            .map(|conv| conv.forward(fused.clone()))
            .collect()
    }
}

/// One unrolled optimization step of the recurrent variational network.
///
/// Updates the running k-space estimate with a learned-step-size gradient on
/// the sampled entries and a recurrent image-domain regularizer expanded back
/// to k-space.
#[derive(Module, Debug)]
pub struct RecurrentVarNetBlock<B: Backend> {
    pub regularizer: Conv2dGru<B>,
    pub learning_rate: Param<Tensor<B, 1>>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> RecurrentVarNetBlock<B> {
    fn new(regularizer: Conv2dGru<B>, fft: FftSpec, device: &B::Device) -> Self {
        Self {
            regularizer,
            learning_rate: Param::from_tensor(Tensor::ones([1], device)),
            fft: Ignored(fft),
        }
    }

    /// One step; threads the regularizer's hidden state.
    pub fn forward(
        &self,
        kspace: Tensor<B, 5>,
        measurement: &Tensor<B, 5>,
        mask: &Tensor<B, 5>,
        sensitivity_maps: &Tensor<B, 5>,
        hidden: Option<HiddenState<B>>,
    ) -> (Tensor<B, 5>, HiddenState<B>) {
        let step = self.learning_rate.val().reshape([1; 5]);
        let kspace_error = (kspace.clone() - measurement.clone()) * mask.clone() * step;

        let image: Tensor<B, 4> = sense_reduce(
            ifft2(kspace.clone(), &self.fft),
            sensitivity_maps.clone(),
            1,
        );
        let (regularization, hidden) = self
            .regularizer
            .forward(image.permute([0, 3, 1, 2]), hidden);
        let regularization_kspace = fft2(
            sense_expand(
                regularization.permute([0, 2, 3, 1]),
                sensitivity_maps.clone(),
                1,
            ),
            &self.fft,
        );

        (kspace - kspace_error - regularization_kspace, hidden)
    }
}

/// Configuration for [`RecurrentVarNet`].
#[derive(Config, Debug)]
pub struct RecurrentVarNetConfig {
    /// Complex image channel count.
    #[config(default = 2)]
    pub in_channels: usize,
    /// Hidden width of the recurrent regularizer.
    #[config(default = 64)]
    pub recurrent_hidden_channels: usize,
    /// Number of recurrent layers.
    #[config(default = 4)]
    pub recurrent_num_layers: usize,
    /// Unrolled steps; rounded up to a multiple of 8 at construction.
    pub num_steps: usize,
    /// One block per step (independent parameters) instead of one shared.
    #[config(default = false)]
    pub no_parameter_sharing: bool,
    /// Produce the first hidden state with a learned initializer.
    #[config(default = true)]
    pub learned_initializer: bool,
    /// Initializer strategy name: `sense`, `input_image` or `zero_filled`.
    #[config(default = "String::from(\"zero_filled\")")]
    pub initializer_initialization: String,
    /// Feature widths of the initializer.
    #[config(default = "vec![32, 32, 64, 64]")]
    pub initializer_channels: Vec<usize>,
    /// Dilations of the initializer.
    #[config(default = "vec![1, 1, 2, 4]")]
    pub initializer_dilations: Vec<usize>,
    /// Multiscale feature depth of the initializer.
    #[config(default = 1)]
    pub initializer_multiscale: usize,
    /// Coil combination applied during finalization.
    #[config(default = "CoilCombinationMethod::Sense")]
    pub coil_combination: CoilCombinationMethod,
    /// Spectral transform convention.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

/// Recurrent variational network orchestrator.
#[derive(Module, Debug)]
pub struct RecurrentVarNet<B: Backend> {
    pub initializer: Option<RecurrentInit<B>>,
    pub blocks: Vec<RecurrentVarNetBlock<B>>,
    pub num_steps: usize,
    pub initializer_initialization: Ignored<Option<InitializerInitialization>>,
    pub no_parameter_sharing: Ignored<bool>,
    pub coil_combination: Ignored<CoilCombinationMethod>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> RecurrentVarNet<B> {
    /// Build the orchestrator. An unrecognized initializer strategy name is
    /// rejected here, not at forward-pass time.
    pub fn new(config: &RecurrentVarNetConfig, device: &B::Device) -> crate::error::Result<Self> {
        if config.num_steps == 0 {
            return Err(ModelError::invalid_configuration(
                "`num_steps` must be at least 1",
            ));
        }
        if config.in_channels != 2 {
            return Err(ModelError::invalid_configuration(format!(
                "the regularizer consumes a complex image, so `in_channels` must be 2, got {}",
                config.in_channels
            )));
        }

        let num_steps = 8 * config.num_steps.div_ceil(8);

        let initialization = if config.learned_initializer {
            Some(InitializerInitialization::from_name(
                &config.initializer_initialization,
            )?)
        } else {
            None
        };
        let initializer = initialization.map(|_| {
            RecurrentInitConfig::new(
                config.in_channels,
                config.recurrent_hidden_channels,
                config.initializer_channels.clone(),
                config.initializer_dilations.clone(),
            )
            .with_depth(config.recurrent_num_layers)
            .with_multiscale_depth(config.initializer_multiscale)
            .init(device)
        });

        let num_blocks = if config.no_parameter_sharing {
            num_steps
        } else {
            1
        };
        let blocks = (0..num_blocks)
            .map(|_| {
                let regularizer = Conv2dGruConfig::new(
                    config.in_channels,
                    config.recurrent_hidden_channels,
                    config.in_channels,
                )
                .with_num_layers(config.recurrent_num_layers)
                .init(device);
                RecurrentVarNetBlock::new(regularizer, config.fft, device)
            })
            .collect();

        Ok(Self {
            initializer,
            blocks,
            num_steps,
            initializer_initialization: Ignored(initialization),
            no_parameter_sharing: Ignored(config.no_parameter_sharing),
            coil_combination: Ignored(config.coil_combination),
            fft: Ignored(config.fft),
        })
    }

    /// Forward pass.
    ///
    /// * `measurement` - subsampled k-space, `[batch, coil, x, y, 2]`.
    /// * `sensitivity_maps` - `[batch, coil, x, y, 2]`.
    /// * `mask` - sampling pattern, `[batch | 1, 1, x, y, 1]`.
    /// * `initial_image` - `[batch, x, y, 2]`; required when the strategy is
    ///   `input_image` (checked here, at the point of use).
    /// * `target` - `[batch, x, y, 2]`, used for crop-matching only.
    ///
    /// Returns the final reconstructed image, `[batch, x, y, 2]`.
    pub fn forward(
        &self,
        measurement: &Tensor<B, 5>,
        sensitivity_maps: &Tensor<B, 5>,
        mask: &Tensor<B, 5>,
        initial_image: Option<&Tensor<B, 4>>,
        target: &Tensor<B, 4>,
    ) -> crate::error::Result<Tensor<B, 4>> {
        validation::validate_complex_pair("measurement", measurement)?;
        validation::validate_complex_pair("sensitivity_maps", sensitivity_maps)?;
        validation::validate_complex_pair("target", target)?;
        validation::validate_mask("mask", mask)?;

        let mut hidden: Option<HiddenState<B>> = None;
        if let Some(initializer) = &self.initializer {
            let strategy = self
                .initializer_initialization
                .expect("initializer exists only with a parsed strategy");
            let input_image: Tensor<B, 5> = match strategy {
                InitializerInitialization::Sense => {
                    let combined: Tensor<B, 4> = complex_mul(
                        ifft2(measurement.clone(), &self.fft),
                        complex_conj(sensitivity_maps.clone()),
                    )
                    .sum_dim(1)
                    .squeeze(1);
                    combined.unsqueeze_dim(1)
                }
                InitializerInitialization::InputImage => initial_image
                    .ok_or_else(|| {
                        ModelError::missing_input(
                            "`initial_image` is required when the initializer strategy is \
                             `input_image`",
                        )
                    })?
                    .clone()
                    .unsqueeze_dim(1),
                InitializerInitialization::ZeroFilled => ifft2(measurement.clone(), &self.fft),
            };

            let summed: Tensor<B, 4> = fft2(input_image, &self.fft).sum_dim(1).squeeze(1);
            hidden = Some(initializer.forward(summed.permute([0, 3, 1, 2])));
        }

        let mut kspace = measurement.clone();
        for step in 0..self.num_steps {
            let block = if *self.no_parameter_sharing {
                &self.blocks[step]
            } else {
                &self.blocks[0]
            };
            let (next, next_hidden) =
                block.forward(kspace, measurement, mask, sensitivity_maps, hidden.take());
            kspace = next;
            hidden = Some(next_hidden);
        }

        let image: Tensor<B, 4> = coil_combination(
            ifft2(kspace, &self.fft),
            sensitivity_maps.clone(),
            *self.coil_combination,
            1,
        );
        let (_, cropped) = center_crop_to_smallest(target.clone(), image, [1, 2], [1, 2]);
        Ok(cropped)
    }
}
