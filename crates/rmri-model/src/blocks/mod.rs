//! Trainable building blocks consumed by the cascade variants.
//!
//! These are deliberately plain collaborators with fixed tensor contracts:
//! a convolutional denoiser mapping `[batch, channels, x, y]` to
//! `[batch, channels, x, y]`, and convolutional recurrent cells threading
//! explicit hidden state. The cascade/orchestration logic lives in
//! `reconstruction` and `quantitative`.

pub mod denoiser;
pub mod recurrent;

pub use denoiser::{ConvDenoiser, ConvDenoiserConfig};
pub use recurrent::{
    Conv2dGru, Conv2dGruConfig, ConvGruCell, ConvGruCellConfig, ConvRnnStack, ConvRnnStackConfig,
    HiddenState,
};
