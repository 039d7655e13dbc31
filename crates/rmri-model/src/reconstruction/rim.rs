//! Recurrent inference cascade.

use burn::module::Ignored;
use burn::prelude::*;

use rmri_core::coil::{sense_expand, sense_reduce};
use rmri_core::fourier::{fft2, ifft2, FftSpec};

use crate::blocks::{ConvRnnStack, ConvRnnStackConfig, HiddenState};
use crate::consistency::{log_likelihood_gradient, SoftDataConsistency};

/// Per-time-step prediction sequence emitted by a [`RimBlock`].
///
/// The domain depends on the data-consistency mode: with the blend enabled
/// the block emits soft-blended multi-coil k-space, otherwise the raw image
/// estimates. The last entry is the cascade's final estimate; keeping the
/// whole sequence lets the orchestrator supervise every step.
#[derive(Debug, Clone)]
pub enum RimPrediction<B: Backend> {
    /// `[batch, coil, x, y, 2]` per time-step.
    KSpace(Vec<Tensor<B, 5>>),
    /// `[batch, x, y, 2]` per time-step.
    Image(Vec<Tensor<B, 4>>),
}

impl<B: Backend> RimPrediction<B> {
    /// Number of retained time-steps.
    pub fn len(&self) -> usize {
        match self {
            Self::KSpace(sequence) => sequence.len(),
            Self::Image(sequence) => sequence.len(),
        }
    }

    /// True when no time-steps were retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configuration for [`RimBlock`].
#[derive(Config, Debug)]
pub struct RimBlockConfig {
    /// Interleaved conv/GRU stack; input is the 4-channel
    /// (estimate, gradient) tensor, output the 2-channel correction.
    pub stack: ConvRnnStackConfig,
    /// Internal time-steps per cascade invocation.
    pub time_steps: usize,
    /// Emit raw image estimates instead of soft-blended k-space.
    #[config(default = false)]
    pub no_dc: bool,
    /// Spectral transform convention.
    #[config(default = "FftSpec::default()")]
    pub fft: FftSpec,
}

impl RimBlockConfig {
    /// Initialize the block on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RimBlock<B> {
        RimBlock {
            stack: self.stack.init(device),
            dc: SoftDataConsistency::new(device),
            time_steps: self.time_steps,
            no_dc: Ignored(self.no_dc),
            fft: Ignored(self.fft),
        }
    }
}

/// One recurrent inference cascade.
///
/// Runs a fixed number of internal time-steps. Each step computes the
/// data-consistency gradient of the current image estimate against the
/// measurement, feeds it together with the estimate through the recurrent
/// stack, and adds the returned incremental correction to the estimate.
#[derive(Module, Debug)]
pub struct RimBlock<B: Backend> {
    pub stack: ConvRnnStack<B>,
    pub dc: SoftDataConsistency<B>,
    pub time_steps: usize,
    pub no_dc: Ignored<bool>,
    pub fft: Ignored<FftSpec>,
}

impl<B: Backend> RimBlock<B> {
    /// One cascade invocation.
    ///
    /// * `prediction` - the previous cascade's sequence; its last entry seeds
    ///   this cascade when `keep_prediction` is set.
    /// * `init_prediction` - optional externally supplied starting image,
    ///   used when the running prediction is reset.
    /// * `hidden` - recurrent state from the previous cascade, `None` on the
    ///   first invocation.
    /// * `sigma` - noise scale of the gradient term.
    /// * `keep_prediction` - carry the running estimate over from the
    ///   previous cascade instead of resetting to the zero-filled estimate.
    ///
    /// Returns the full per-time-step sequence and the updated hidden state.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        prediction: Option<&RimPrediction<B>>,
        measurement: &Tensor<B, 5>,
        sensitivity_maps: &Tensor<B, 5>,
        mask: &Tensor<B, 5>,
        init_prediction: Option<&Tensor<B, 4>>,
        hidden: Option<HiddenState<B>>,
        sigma: f64,
        keep_prediction: bool,
    ) -> (RimPrediction<B>, HiddenState<B>) {
        let mut estimate = match (keep_prediction, prediction) {
            (true, Some(RimPrediction::KSpace(sequence))) => sense_reduce(
                ifft2(
                    sequence.last().expect("kept sequence is never empty").clone(),
                    &self.fft,
                ),
                sensitivity_maps.clone(),
                1,
            ),
            (true, Some(RimPrediction::Image(sequence))) => sequence
                .last()
                .expect("kept sequence is never empty")
                .clone(),
            _ => match init_prediction {
                Some(image) => image.clone(),
                None => sense_reduce(
                    ifft2(measurement.clone(), &self.fft),
                    sensitivity_maps.clone(),
                    1,
                ),
            },
        };

        let [batch, _, height, width, _] = measurement.dims();
        let mut states = hidden.unwrap_or_else(|| {
            self.stack
                .init_states(batch, height, width, &measurement.device())
        });

        let mut sequence = Vec::with_capacity(self.time_steps);
        for _ in 0..self.time_steps {
            let gradient = log_likelihood_gradient(
                &estimate,
                measurement,
                sensitivity_maps,
                mask,
                sigma,
                &self.fft,
            );
            let (correction, next_states) = self.stack.forward(gradient, states);
            states = next_states;
            estimate = estimate + correction.permute([0, 2, 3, 1]);
            sequence.push(estimate.clone());
        }

        if *self.no_dc {
            (RimPrediction::Image(sequence), states)
        } else {
            let blended = sequence
                .into_iter()
                .map(|image| {
                    self.dc.apply(
                        fft2(sense_expand(image, sensitivity_maps.clone(), 1), &self.fft),
                        measurement,
                        mask,
                    )
                })
                .collect();
            (RimPrediction::KSpace(blended), states)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn unit_maps(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 5> {
        let ones = Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], device);
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 1, 8, 8], device);
        Tensor::stack(vec![ones, zeros], 4)
    }

    fn block(no_dc: bool, device: &<TestBackend as Backend>::Device) -> RimBlock<TestBackend> {
        RimBlockConfig::new(ConvRnnStackConfig::rim_default(4, 8, 2), 4)
            .with_no_dc(no_dc)
            .init(device)
    }

    #[test]
    fn test_emits_full_time_step_sequence() {
        let device = Default::default();
        let y = Tensor::<TestBackend, 5>::random(
            [1, 1, 8, 8, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let maps = unit_maps(&device);
        let mask = Tensor::<TestBackend, 5>::ones([1, 1, 8, 8, 1], &device);

        let rim = block(false, &device);
        let (prediction, states) =
            rim.forward(None, &y, &maps, &mask, None, None, 1.0, false);

        assert_eq!(prediction.len(), 4);
        assert!(matches!(prediction, RimPrediction::KSpace(_)));
        assert_eq!(states.len(), 2);
        for state in &states {
            assert_eq!(state.dims(), [1, 8, 8, 8]);
        }
    }

    #[test]
    fn test_no_dc_emits_image_domain() {
        let device = Default::default();
        let y = Tensor::<TestBackend, 5>::random(
            [1, 1, 8, 8, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let maps = unit_maps(&device);
        let mask = Tensor::<TestBackend, 5>::ones([1, 1, 8, 8, 1], &device);

        let rim = block(true, &device);
        let (prediction, _) = rim.forward(None, &y, &maps, &mask, None, None, 1.0, false);

        match prediction {
            RimPrediction::Image(sequence) => {
                assert_eq!(sequence.len(), 4);
                assert_eq!(sequence[0].dims(), [1, 8, 8, 2]);
            }
            RimPrediction::KSpace(_) => panic!("no_dc block must emit image estimates"),
        }
    }

    #[test]
    fn test_hidden_state_shape_is_step_count_independent() {
        let device = Default::default();
        let y = Tensor::<TestBackend, 5>::random(
            [1, 1, 8, 8, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let maps = unit_maps(&device);
        let mask = Tensor::<TestBackend, 5>::ones([1, 1, 8, 8, 1], &device);

        let short = RimBlockConfig::new(ConvRnnStackConfig::rim_default(4, 8, 2), 2)
            .init(&device);
        let long = RimBlockConfig::new(ConvRnnStackConfig::rim_default(4, 8, 2), 8)
            .init(&device);

        let (_, state_short) = short.forward(None, &y, &maps, &mask, None, None, 1.0, false);
        let (_, state_long) = long.forward(None, &y, &maps, &mask, None, None, 1.0, false);

        assert_eq!(state_short.len(), state_long.len());
        for (a, b) in state_short.iter().zip(state_long.iter()) {
            assert_eq!(a.dims(), b.dims());
        }
    }
}
