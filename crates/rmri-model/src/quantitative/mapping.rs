//! Closed-form estimation of R2*, S0, B0 and phi from multi-echo images.
//!
//! The fit is per-pixel ordinary least squares and is not part of the
//! trainable graph, so it runs on the raw tensor data: the magnitude decay is
//! fit log-linearly (`ln |S_e| = ln S0 - R2* * TE_e`) and the unwrapped phase
//! linearly (`angle(S_e) = 2*pi * B0 * TE_e + phi`). Pixels outside the brain
//! mask are zeroed.

use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Fit the four parameter maps from per-echo complex images.
///
/// * `echo_images` - `[batch, echo, x, y, 2]`.
/// * `echo_times` - one entry per echo, in seconds.
/// * `brain_mask` - `[batch, 1, x, y, 1]`; non-positive entries are excluded.
///
/// Returns `(r2star, s0, b0, phi)`, each `[batch, x, y]`.
pub fn r2star_b0_s0_phi_mapping<B: Backend>(
    echo_images: &Tensor<B, 5>,
    echo_times: &[f64],
    brain_mask: &Tensor<B, 5>,
) -> (Tensor<B, 3>, Tensor<B, 3>, Tensor<B, 3>, Tensor<B, 3>) {
    let [batch, num_echoes, height, width, _] = echo_images.dims();
    assert_eq!(
        num_echoes,
        echo_times.len(),
        "echo axis ({num_echoes}) must match the number of echo times ({})",
        echo_times.len()
    );
    let device = echo_images.device();

    let data: Vec<f32> = echo_images
        .to_data()
        .convert::<f32>()
        .to_vec()
        .expect("echo images are contiguous float data");
    let mask: Vec<f32> = brain_mask
        .to_data()
        .convert::<f32>()
        .to_vec()
        .expect("brain mask is contiguous float data");

    let pixels = batch * height * width;
    let mut r2star = vec![0.0f32; pixels];
    let mut s0 = vec![0.0f32; pixels];
    let mut b0 = vec![0.0f32; pixels];
    let mut phi = vec![0.0f32; pixels];

    let tes: Vec<f64> = echo_times.to_vec();
    let n = num_echoes as f64;
    let sum_t: f64 = tes.iter().sum();
    let sum_tt: f64 = tes.iter().map(|t| t * t).sum();
    let denom = n * sum_tt - sum_t * sum_t;

    for b in 0..batch {
        for y in 0..height {
            for x in 0..width {
                let pixel = (b * height + y) * width + x;
                if mask[pixel] <= 0.0 {
                    continue;
                }

                let mut magnitudes = Vec::with_capacity(num_echoes);
                let mut phases = Vec::with_capacity(num_echoes);
                for e in 0..num_echoes {
                    let idx = ((((b * num_echoes + e) * height) + y) * width + x) * 2;
                    let (re, im) = (data[idx] as f64, data[idx + 1] as f64);
                    magnitudes.push((re * re + im * im).sqrt().max(1e-8));
                    phases.push(im.atan2(re));
                }

                // Sequential unwrap keeps successive phase increments in
                // (-pi, pi] before the linear fit.
                let mut offset = 0.0f64;
                let mut unwrapped = Vec::with_capacity(num_echoes);
                unwrapped.push(phases[0]);
                for e in 1..num_echoes {
                    let mut delta = phases[e] - phases[e - 1];
                    while delta > core::f64::consts::PI {
                        delta -= core::f64::consts::TAU;
                        offset -= core::f64::consts::TAU;
                    }
                    while delta <= -core::f64::consts::PI {
                        delta += core::f64::consts::TAU;
                        offset += core::f64::consts::TAU;
                    }
                    unwrapped.push(phases[e] + offset);
                }

                if num_echoes < 2 || denom.abs() < 1e-12 {
                    s0[pixel] = magnitudes[0] as f32;
                    phi[pixel] = unwrapped[0] as f32;
                    continue;
                }

                let log_mag: Vec<f64> = magnitudes.iter().map(|m| m.ln()).collect();
                let (mag_slope, mag_intercept) = line_fit(&tes, &log_mag, sum_t, sum_tt, denom);
                let (phase_slope, phase_intercept) =
                    line_fit(&tes, &unwrapped, sum_t, sum_tt, denom);

                r2star[pixel] = (-mag_slope).max(0.0) as f32;
                s0[pixel] = mag_intercept.exp() as f32;
                b0[pixel] = (phase_slope / core::f64::consts::TAU) as f32;
                phi[pixel] = phase_intercept as f32;
            }
        }
    }

    let build = |values: Vec<f32>| {
        Tensor::<B, 3>::from_data(TensorData::new(values, [batch, height, width]), &device)
    };
    (build(r2star), build(s0), build(b0), build(phi))
}

fn line_fit(xs: &[f64], ys: &[f64], sum_x: f64, sum_xx: f64, denom: f64) -> (f64, f64) {
    let n = xs.len() as f64;
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys.iter()).map(|(x, y)| x * y).sum();
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantitative::signal::{SignalForwardModel, SignalSequence};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_fit_recovers_synthetic_parameters() {
        let device = Default::default();
        let model = SignalForwardModel::new(SignalSequence::Megre);

        let r2star = Tensor::<TestBackend, 3>::ones([1, 3, 3], &device).mul_scalar(40.0);
        let s0 = Tensor::<TestBackend, 3>::ones([1, 3, 3], &device).mul_scalar(1.5);
        let b0 = Tensor::<TestBackend, 3>::ones([1, 3, 3], &device).mul_scalar(12.0);
        let phi = Tensor::<TestBackend, 3>::ones([1, 3, 3], &device).mul_scalar(0.3);

        let tes = [0.003, 0.006, 0.009, 0.012];
        let images = model.forward(&r2star, &s0, &b0, &phi, &tes);
        let mask = Tensor::<TestBackend, 5>::ones([1, 1, 3, 3, 1], &device);

        let (r2_fit, s0_fit, b0_fit, phi_fit) = r2star_b0_s0_phi_mapping(&images, &tes, &mask);

        let check = |fit: Tensor<TestBackend, 3>, expected: f32, name: &str| {
            let err = fit.sub_scalar(expected).abs().max().into_scalar();
            assert!(err < 1e-2, "{name} off by {err}");
        };
        check(r2_fit, 40.0, "r2star");
        check(s0_fit, 1.5, "s0");
        check(b0_fit, 12.0, "b0");
        check(phi_fit, 0.3, "phi");
    }

    #[test]
    fn test_mask_zeroes_background() {
        let device = Default::default();
        let model = SignalForwardModel::new(SignalSequence::Megre);

        let r2star = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device).mul_scalar(25.0);
        let s0 = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);
        let b0 = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);
        let phi = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);

        let tes = [0.004, 0.008];
        let images = model.forward(&r2star, &s0, &b0, &phi, &tes);
        let mask = Tensor::<TestBackend, 5>::zeros([1, 1, 2, 2, 1], &device);

        let (r2_fit, s0_fit, _, _) = r2star_b0_s0_phi_mapping(&images, &tes, &mask);
        assert!(r2_fit.abs().max().into_scalar() < 1e-7);
        assert!(s0_fit.abs().max().into_scalar() < 1e-7);
    }

    #[test]
    fn test_phase_wrap_handled() {
        let device = Default::default();
        let model = SignalForwardModel::new(SignalSequence::Megre);

        // Large B0 pushes successive echo phases across the +/-pi boundary.
        let r2star = Tensor::<TestBackend, 3>::ones([1, 1, 1], &device).mul_scalar(10.0);
        let s0 = Tensor::<TestBackend, 3>::ones([1, 1, 1], &device);
        let b0 = Tensor::<TestBackend, 3>::ones([1, 1, 1], &device).mul_scalar(150.0);
        let phi = Tensor::<TestBackend, 3>::zeros([1, 1, 1], &device);

        let tes = [0.002, 0.004, 0.006, 0.008];
        let images = model.forward(&r2star, &s0, &b0, &phi, &tes);
        let mask = Tensor::<TestBackend, 5>::ones([1, 1, 1, 1, 1], &device);

        let (_, _, b0_fit, _) = r2star_b0_s0_phi_mapping(&images, &tes, &mask);
        let err = b0_fit.sub_scalar(150.0).abs().max().into_scalar();
        assert!(err < 0.5, "b0 off by {err}");
    }
}
