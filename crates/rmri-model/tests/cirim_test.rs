use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;

use rmri_core::fourier::FftSpec;
use rmri_model::blocks::ConvRnnStackConfig;
use rmri_model::reconstruction::{Cirim, CirimConfig, CirimOutput};

type Backend = NdArray<f32>;
type Device = <Backend as burn::tensor::backend::Backend>::Device;

fn unit_maps(batch: usize, coils: usize, size: usize, device: &Device) -> Tensor<Backend, 5> {
    let ones = Tensor::<Backend, 4>::ones([batch, coils, size, size], device);
    let zeros = Tensor::<Backend, 4>::zeros([batch, coils, size, size], device);
    Tensor::stack(vec![ones, zeros], 4)
}

fn config(num_cascades: usize, time_steps: usize) -> CirimConfig {
    CirimConfig::new(time_steps, ConvRnnStackConfig::rim_default(4, 8, 2))
        .with_num_cascades(num_cascades)
        .with_fft(FftSpec::ortho_centered())
}

#[test]
fn test_time_steps_round_up_to_multiple_of_eight() {
    let device = Device::default();
    let model = Cirim::<Backend>::new(&config(1, 5), &device).unwrap();
    assert_eq!(model.time_steps, 8);

    let model = Cirim::<Backend>::new(&config(1, 8), &device).unwrap();
    assert_eq!(model.time_steps, 8);

    let model = Cirim::<Backend>::new(&config(1, 9), &device).unwrap();
    assert_eq!(model.time_steps, 16);
}

#[test]
fn test_accumulation_keeps_every_cascade_and_time_step() {
    let device = Device::default();
    let model = Cirim::<Backend>::new(
        &config(2, 8).with_accumulate_predictions(true),
        &device,
    )
    .unwrap();

    let y = Tensor::<Backend, 5>::random([1, 1, 8, 8, 2], Distribution::Normal(0.0, 1.0), &device);
    let maps = unit_maps(1, 1, 8, &device);
    let mask = Tensor::<Backend, 5>::ones([1, 1, 8, 8, 1], &device);
    let target = Tensor::<Backend, 4>::zeros([1, 8, 8, 2], &device);

    match model.forward(&y, &maps, &mask, None, &target).unwrap() {
        CirimOutput::Cascades(history) => {
            assert_eq!(history.len(), 2);
            for steps in &history {
                assert_eq!(steps.len(), 8);
                for prediction in steps {
                    assert_eq!(prediction.dims(), [1, 8, 8, 2]);
                }
            }
        }
        CirimOutput::Final(_) => panic!("accumulation must keep the full history"),
    }
}

#[test]
fn test_without_accumulation_only_final_survives() {
    let device = Device::default();
    let model = Cirim::<Backend>::new(&config(2, 8), &device).unwrap();

    let y = Tensor::<Backend, 5>::random([1, 1, 8, 8, 2], Distribution::Normal(0.0, 1.0), &device);
    let maps = unit_maps(1, 1, 8, &device);
    let mask = Tensor::<Backend, 5>::ones([1, 1, 8, 8, 1], &device);
    let target = Tensor::<Backend, 4>::zeros([1, 8, 8, 2], &device);

    match model.forward(&y, &maps, &mask, None, &target).unwrap() {
        CirimOutput::Final(prediction) => assert_eq!(prediction.dims(), [1, 8, 8, 2]),
        CirimOutput::Cascades(_) => panic!("history retained without the accumulation flag"),
    }
}

#[test]
fn test_keep_prediction_threads_cascades() {
    let device = Device::default();
    // Both settings must run cleanly over several cascades; the first
    // cascade always resets regardless.
    for keep in [false, true] {
        let model = Cirim::<Backend>::new(
            &config(3, 8).with_keep_prediction(keep),
            &device,
        )
        .unwrap();

        let y =
            Tensor::<Backend, 5>::random([1, 1, 8, 8, 2], Distribution::Normal(0.0, 1.0), &device);
        let maps = unit_maps(1, 1, 8, &device);
        let mask = Tensor::<Backend, 5>::ones([1, 1, 8, 8, 1], &device);
        let target = Tensor::<Backend, 4>::zeros([1, 8, 8, 2], &device);

        let output = model.forward(&y, &maps, &mask, None, &target).unwrap();
        assert_eq!(output.final_prediction().dims(), [1, 8, 8, 2]);
    }
}

#[test]
fn test_no_dc_variant_runs_in_image_domain() {
    let device = Device::default();
    let model = Cirim::<Backend>::new(
        &config(2, 8).with_no_dc(true).with_accumulate_predictions(true),
        &device,
    )
    .unwrap();

    let y = Tensor::<Backend, 5>::random([1, 1, 8, 8, 2], Distribution::Normal(0.0, 1.0), &device);
    let maps = unit_maps(1, 1, 8, &device);
    let mask = Tensor::<Backend, 5>::ones([1, 1, 8, 8, 1], &device);
    let target = Tensor::<Backend, 4>::zeros([1, 8, 8, 2], &device);

    match model.forward(&y, &maps, &mask, None, &target).unwrap() {
        CirimOutput::Cascades(history) => {
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].len(), 8);
        }
        CirimOutput::Final(_) => panic!("accumulation must keep the full history"),
    }
}

#[test]
fn test_batch_independence() {
    let device = Device::default();
    let model = Cirim::<Backend>::new(&config(1, 8), &device).unwrap();

    let y = Tensor::<Backend, 5>::random([2, 1, 8, 8, 2], Distribution::Normal(0.0, 1.0), &device);
    let maps = unit_maps(2, 1, 8, &device);
    let mask = Tensor::<Backend, 5>::ones([1, 1, 8, 8, 1], &device);
    let target = Tensor::<Backend, 4>::zeros([2, 8, 8, 2], &device);

    let batched = model
        .forward(&y, &maps, &mask, None, &target)
        .unwrap()
        .final_prediction()
        .clone();

    for sample in 0..2 {
        let single = model
            .forward(
                &y.clone().narrow(0, sample, 1),
                &maps.clone().narrow(0, sample, 1),
                &mask,
                None,
                &target.clone().narrow(0, sample, 1),
            )
            .unwrap()
            .final_prediction()
            .clone();

        let diff = (batched.clone().narrow(0, sample, 1) - single)
            .abs()
            .max()
            .into_scalar();
        assert!(diff < 1e-4, "sample {sample} leaked across the batch axis");
    }
}

#[test]
fn test_rejects_wrong_stack_input_channels() {
    let device = Device::default();
    let config = CirimConfig::new(8, ConvRnnStackConfig::rim_default(2, 8, 2));
    let err = Cirim::<Backend>::new(&config, &device).unwrap_err();
    assert!(err.to_string().contains("4"));
}
