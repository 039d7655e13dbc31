//! Gamma normalization of the quantitative map stack.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Fixed per-map scale factors keeping heterogeneous physical units
/// numerically comparable inside the network.
///
/// `forward` divides each channel of a `[batch, 4, x, y]` stack by its factor
/// before the cascades; `reverse` multiplies once after the last cascade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaRescale {
    pub gamma: [f64; 4],
}

impl GammaRescale {
    pub fn new(gamma: [f64; 4]) -> Self {
        Self { gamma }
    }

    /// Normalize: divide each map channel by its scale factor.
    pub fn forward<B: Backend>(&self, maps: Tensor<B, 4>) -> Tensor<B, 4> {
        self.scale(maps, true)
    }

    /// De-normalize: multiply each map channel by its scale factor.
    pub fn reverse<B: Backend>(&self, maps: Tensor<B, 4>) -> Tensor<B, 4> {
        self.scale(maps, false)
    }

    fn scale<B: Backend>(&self, maps: Tensor<B, 4>, divide: bool) -> Tensor<B, 4> {
        assert_eq!(maps.dims()[1], 4, "expected a 4-channel quantitative map stack");
        let channels = (0..4)
            .map(|i| {
                let channel = maps.clone().narrow(1, i, 1);
                if divide {
                    channel.div_scalar(self.gamma[i])
                } else {
                    channel.mul_scalar(self.gamma[i])
                }
            })
            .collect();
        Tensor::cat(channels, 1)
    }
}

impl Default for GammaRescale {
    fn default() -> Self {
        // R2* (1/s), S0 (a.u.), B0 (Hz), phi (rad)
        Self::new([150.0, 150.0, 1000.0, 100.0])
    }
}
