//! Biophysical signal forward model and its analytic adjoint.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Supported acquisition sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSequence {
    /// Multi-echo gradient echo.
    Megre,
}

impl SignalSequence {
    /// Parse a configured sequence name; unrecognized names are fatal.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "megre" => Ok(Self::Megre),
            other => Err(ModelError::invalid_configuration(format!(
                "unknown signal model sequence; expected `megre`, got `{other}`"
            ))),
        }
    }
}

/// Maps quantitative tissue parameters to the expected complex signal at each
/// echo time.
///
/// For MEGRE the per-echo signal is
/// `S_e = S0 * exp(-R2* * TE_e) * exp(i * (2*pi * B0 * TE_e + phi))`.
#[derive(Debug, Clone)]
pub struct SignalForwardModel {
    pub sequence: SignalSequence,
}

impl SignalForwardModel {
    pub fn new(sequence: SignalSequence) -> Self {
        Self { sequence }
    }

    /// Synthesize the expected signal.
    ///
    /// Maps are `[batch, x, y]`; the result is `[batch, echo, x, y, 2]` with
    /// one entry per echo time.
    pub fn forward<B: Backend>(
        &self,
        r2star: &Tensor<B, 3>,
        s0: &Tensor<B, 3>,
        b0: &Tensor<B, 3>,
        phi: &Tensor<B, 3>,
        echo_times: &[f64],
    ) -> Tensor<B, 5> {
        let SignalSequence::Megre = self.sequence;

        let echoes: Vec<Tensor<B, 4>> = echo_times
            .iter()
            .map(|&te| {
                let magnitude = s0.clone() * r2star.clone().mul_scalar(-te).exp();
                let phase = b0.clone().mul_scalar(core::f64::consts::TAU * te) + phi.clone();
                Tensor::stack(
                    vec![
                        magnitude.clone() * phase.clone().cos(),
                        magnitude * phase.sin(),
                    ],
                    3,
                )
            })
            .collect();

        Tensor::stack(echoes, 1)
    }

    /// Project a per-echo complex residual back onto the four parameter
    /// channels through the conjugated partial derivatives of the signal
    /// equation: for each parameter `p`, the channel is
    /// `sum_e Re{ conj(dS_e/dp) * residual_e }`.
    ///
    /// `residual` is `[batch, echo, x, y, 2]`; the result is
    /// `[batch, 4, x, y]` ordered (R2*, S0, B0, phi).
    pub fn gradient<B: Backend>(
        &self,
        residual: &Tensor<B, 5>,
        r2star: &Tensor<B, 3>,
        s0: &Tensor<B, 3>,
        b0: &Tensor<B, 3>,
        phi: &Tensor<B, 3>,
        echo_times: &[f64],
    ) -> Tensor<B, 4> {
        let SignalSequence::Megre = self.sequence;
        let [batch, _, height, width, _] = residual.dims();
        let device = residual.device();

        let zeros = || Tensor::<B, 3>::zeros([batch, height, width], &device);
        let (mut g_r2star, mut g_s0, mut g_b0, mut g_phi) =
            (zeros(), zeros(), zeros(), zeros());

        for (echo, &te) in echo_times.iter().enumerate() {
            let r: Tensor<B, 4> = residual.clone().narrow(1, echo, 1).squeeze(1);
            let rr: Tensor<B, 3> = r.clone().narrow(3, 0, 1).squeeze(3);
            let ri: Tensor<B, 3> = r.narrow(3, 1, 1).squeeze(3);

            let decay = r2star.clone().mul_scalar(-te).exp();
            let phase = b0.clone().mul_scalar(core::f64::consts::TAU * te) + phi.clone();
            let (cos, sin) = (phase.clone().cos(), phase.sin());

            // Unit signal exp(-R2* TE) * exp(i phase) and the full signal S.
            let ur = decay.clone() * cos;
            let ui = decay * sin;
            let sr = s0.clone() * ur.clone();
            let si = s0.clone() * ui.clone();

            // dS/dR2* = -TE * S
            g_r2star = g_r2star
                + (sr.clone() * rr.clone() + si.clone() * ri.clone()).mul_scalar(-te);
            // dS/dS0 = S / S0
            g_s0 = g_s0 + ur * rr.clone() + ui * ri.clone();
            // dS/dB0 = i * 2*pi * TE * S
            g_b0 = g_b0
                + (sr.clone() * ri.clone() - si.clone() * rr.clone())
                    .mul_scalar(core::f64::consts::TAU * te);
            // dS/dphi = i * S
            g_phi = g_phi + sr * ri - si * rr;
        }

        Tensor::stack(vec![g_r2star, g_s0, g_b0, g_phi], 1)
    }
}
