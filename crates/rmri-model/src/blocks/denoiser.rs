//! Plain convolutional denoiser.

use burn::module::Param;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation;

/// Configuration for [`ConvDenoiser`].
///
/// `kernels` and `dilations` cover every convolution including the output
/// layer, so their length is `filters.len() + 1`.
#[derive(Config, Debug)]
pub struct ConvDenoiserConfig {
    /// Input channel count.
    pub in_channels: usize,
    /// Output channel count.
    pub out_channels: usize,
    /// Hidden layer widths.
    pub filters: Vec<usize>,
    /// Kernel size per convolution.
    pub kernels: Vec<usize>,
    /// Dilation per convolution.
    pub dilations: Vec<usize>,
    /// Learn a bias term per convolution.
    #[config(default = true)]
    pub bias: bool,
}

impl ConvDenoiserConfig {
    /// Initialize the denoiser on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvDenoiser<B> {
        let num_layers = self.filters.len() + 1;
        assert_eq!(
            self.kernels.len(),
            num_layers,
            "expected one kernel size per convolution ({num_layers}), got {}",
            self.kernels.len()
        );
        assert_eq!(
            self.dilations.len(),
            num_layers,
            "expected one dilation per convolution ({num_layers}), got {}",
            self.dilations.len()
        );

        let mut layers = Vec::with_capacity(num_layers);
        let mut in_channels = self.in_channels;
        for (i, (&kernel, &dilation)) in self.kernels.iter().zip(self.dilations.iter()).enumerate()
        {
            let out_channels = if i < self.filters.len() {
                self.filters[i]
            } else {
                self.out_channels
            };
            layers.push(same_conv2d::<B>(
                in_channels,
                out_channels,
                kernel,
                dilation,
                self.bias,
                device,
            ));
            in_channels = out_channels;
        }

        ConvDenoiser { layers }
    }
}

fn same_conv2d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    dilation: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    assert!(kernel % 2 == 1, "same-padding requires an odd kernel, got {kernel}");
    let padding = dilation * (kernel - 1) / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([1, 1])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_dilation([dilation, dilation])
        .with_bias(bias)
        .init(device)
}

/// Convolutional denoiser with ReLU between layers and a linear output.
///
/// Maps `[batch, in_channels, x, y]` to `[batch, out_channels, x, y]`.
#[derive(Module, Debug)]
pub struct ConvDenoiser<B: Backend> {
    pub layers: Vec<Conv2d<B>>,
}

impl<B: Backend> ConvDenoiser<B> {
    /// Forward pass.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let last = self.layers.len() - 1;
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = activation::relu(x);
            }
        }
        x
    }

    /// A single bias-free convolution whose kernel is a Dirac delta, so the
    /// forward pass is exactly the identity. Used to pin down cascade
    /// behavior in tests.
    pub fn identity(channels: usize, kernel: usize, device: &B::Device) -> Self {
        assert!(kernel % 2 == 1, "identity kernel must be odd, got {kernel}");
        let mut conv = same_conv2d::<B>(channels, channels, kernel, 1, false, device);

        let center = kernel / 2;
        let mut weight = vec![0.0f32; channels * channels * kernel * kernel];
        for c in 0..channels {
            weight[((c * channels + c) * kernel + center) * kernel + center] = 1.0;
        }
        conv.weight = Param::from_tensor(
            Tensor::<B, 1>::from_data(weight.as_slice(), device)
                .reshape([channels, channels, kernel, kernel]),
        );

        Self { layers: vec![conv] }
    }
}
