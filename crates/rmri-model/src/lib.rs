//! Iterative deep-learning reconstruction models for accelerated MRI.
//!
//! Cascaded variational networks and recurrent inference machines that
//! recover images (and, in the quantitative pipeline, tissue parameter maps)
//! from subsampled k-space measurements. Each cascade alternates a
//! trainable denoising step with a physics data-consistency step; the
//! orchestrators stack cascades, thread recurrent hidden state and retain
//! intermediate predictions for multi-term supervision.
//!
//! # Module Structure
//!
//! ```text
//! rmri-model/
//! ├── blocks/          - conv denoiser, conv GRU cells and stacks
//! ├── consistency/     - soft data-consistency and the RIM gradient term
//! ├── reconstruction/  - VarNet, CIRIM and RecurrentVarNet pipelines
//! ├── quantitative/    - signal model, parameter fit, qVarNet pipeline
//! ├── loss/            - loss processing over prediction histories
//! └── error/           - fatal configuration/input error taxonomy
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use burn_ndarray::NdArray;
//! use burn::tensor::Tensor;
//! use rmri_model::blocks::ConvDenoiserConfig;
//! use rmri_model::reconstruction::{VarNet, VarNetConfig};
//!
//! type B = NdArray<f32>;
//! let device = Default::default();
//!
//! let config = VarNetConfig::new(ConvDenoiserConfig::new(
//!     2, 2, vec![32, 32], vec![5, 3, 3], vec![1, 1, 1],
//! ));
//! let model = VarNet::<B>::new(&config, &device).unwrap();
//!
//! let y = Tensor::<B, 5>::zeros([1, 4, 32, 32, 2], &device);
//! let maps = Tensor::<B, 5>::zeros([1, 4, 32, 32, 2], &device);
//! let mask = Tensor::<B, 5>::ones([1, 1, 32, 32, 1], &device);
//! let target = Tensor::<B, 4>::zeros([1, 32, 32, 2], &device);
//! let output = model.forward(&y, &maps, &mask, &target).unwrap();
//! let image = output.final_prediction();
//! ```

pub mod blocks;
pub mod consistency;
pub mod error;
pub mod loss;
pub mod quantitative;
pub mod reconstruction;
pub mod validation;

pub use error::{ModelError, Result};

pub use blocks::{
    Conv2dGru, Conv2dGruConfig, ConvDenoiser, ConvDenoiserConfig, ConvGruCell, ConvGruCellConfig,
    ConvRnnStack, ConvRnnStackConfig, HiddenState,
};

pub use consistency::{log_likelihood_gradient, SoftDataConsistency};

pub use reconstruction::{
    Cirim, CirimConfig, CirimOutput, InitializerInitialization, RecurrentInit,
    RecurrentInitConfig, RecurrentVarNet, RecurrentVarNetBlock, RecurrentVarNetConfig,
    ReconstructionOutput, RimBlock, RimBlockConfig, RimPrediction, VarNet, VarNetBlock,
    VarNetBlockConfig, VarNetConfig,
};

pub use quantitative::{
    r2star_b0_s0_phi_mapping, GammaRescale, QVarNet, QVarNetBlock, QVarNetBlockConfig,
    QVarNetConfig, QVarNetOutput, QuantitativeMaps, SignalForwardModel, SignalSequence,
};

pub use loss::{
    cascades_time_steps_loss, logspace_weights, normalization_stats, reconstruction_loss,
    unnormalize, unnormalize_loss_inputs, LossAttributes, LossKind, NormalizationStats,
    NormalizationType, ReconstructionLossConfig,
};
