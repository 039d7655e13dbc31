pub mod complex;
pub mod coil;
pub mod crop;
pub mod fourier;

pub use coil::CoilCombinationMethod;
pub use fourier::{FftNormalization, FftSpec};
