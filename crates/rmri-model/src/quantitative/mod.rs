//! Quantitative parameter-map reconstruction.
//!
//! # Module Structure
//!
//! ```text
//! quantitative/
//! ├── signal/   - biophysical signal model (MEGRE) and its analytic adjoint
//! ├── mapping/  - closed-form R2*/S0/B0/phi fit from multi-echo images
//! ├── rescale/  - gamma normalization keeping map units comparable
//! └── qvarnet/  - quantitative cascade and orchestrator
//! ```

pub mod mapping;
pub mod qvarnet;
pub mod rescale;
pub mod signal;

pub use mapping::r2star_b0_s0_phi_mapping;
pub use qvarnet::{QVarNet, QVarNetBlock, QVarNetBlockConfig, QVarNetConfig, QVarNetOutput, QuantitativeMaps};
pub use rescale::GammaRescale;
pub use signal::{SignalForwardModel, SignalSequence};
