//! Image-reconstruction cascades and orchestrators.
//!
//! # Module Structure
//!
//! ```text
//! reconstruction/
//! ├── varnet/           - plain variational cascade + cascade-stack orchestrator
//! ├── rim/              - recurrent inference cascade (internal time-steps)
//! ├── cirim/            - cascades of recurrent inference machines
//! └── recurrentvarnet/  - recurrent variational network with learned init
//! ```
//!
//! Every orchestrator follows the same strictly forward pipeline:
//! `INIT -> (DENOISE -> CONSISTENCY -> [ACCUMULATE]) x N -> FINALIZE`, where
//! finalization inverse-transforms the k-space estimate, combines coils and
//! center-crops against the target extent. No stage re-enters a prior one,
//! and no stage mixes information across the batch axis.

pub mod cirim;
pub mod recurrentvarnet;
pub mod rim;
pub mod varnet;

pub use cirim::{Cirim, CirimConfig, CirimOutput};
pub use recurrentvarnet::{
    InitializerInitialization, RecurrentInit, RecurrentInitConfig, RecurrentVarNet,
    RecurrentVarNetBlock, RecurrentVarNetConfig,
};
pub use rim::{RimBlock, RimBlockConfig, RimPrediction};
pub use varnet::{ReconstructionOutput, VarNet, VarNetBlock, VarNetBlockConfig, VarNetConfig};
