//! Convolutional recurrent cells and stacks.
//!
//! Hidden state is threaded explicitly: every forward call takes the previous
//! state and returns the next one, with `init_states` (or `None` at the call
//! site) standing in for the first step. The state is a plain
//! `Vec<Tensor<B, 4>>`, one entry per recurrent stage, shaped by the
//! configured channel width and the spatial extent of the input, never by
//! the number of time-steps.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation;

/// Recurrent memory carried between inference steps.
pub type HiddenState<B> = Vec<Tensor<B, 4>>;

/// Configuration for [`ConvGruCell`].
#[derive(Config, Debug)]
pub struct ConvGruCellConfig {
    /// Input channel count.
    pub in_channels: usize,
    /// Hidden channel count.
    pub hidden_channels: usize,
    /// Gate convolution kernel size.
    #[config(default = 3)]
    pub kernel_size: usize,
    /// Gate convolution dilation.
    #[config(default = 1)]
    pub dilation: usize,
    /// Learn bias terms on the gate convolutions.
    #[config(default = true)]
    pub bias: bool,
}

impl ConvGruCellConfig {
    /// Initialize the cell on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvGruCell<B> {
        let gate = |device| {
            gate_conv2d::<B>(
                self.in_channels + self.hidden_channels,
                self.hidden_channels,
                self.kernel_size,
                self.dilation,
                self.bias,
                device,
            )
        };
        ConvGruCell {
            update: gate(device),
            reset: gate(device),
            candidate: gate(device),
            hidden_channels: self.hidden_channels,
        }
    }
}

fn gate_conv2d<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    dilation: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = dilation * (kernel - 1) / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([1, 1])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_dilation([dilation, dilation])
        .with_bias(bias)
        .init(device)
}

/// Convolutional GRU cell over `[batch, channels, x, y]` feature maps.
#[derive(Module, Debug)]
pub struct ConvGruCell<B: Backend> {
    update: Conv2d<B>,
    reset: Conv2d<B>,
    candidate: Conv2d<B>,
    pub hidden_channels: usize,
}

impl<B: Backend> ConvGruCell<B> {
    /// One recurrence step; returns the next hidden state.
    pub fn forward(&self, input: Tensor<B, 4>, hidden: Tensor<B, 4>) -> Tensor<B, 4> {
        let stacked = Tensor::cat(vec![input.clone(), hidden.clone()], 1);
        let z = activation::sigmoid(self.update.forward(stacked.clone()));
        let r = activation::sigmoid(self.reset.forward(stacked));
        let candidate = self
            .candidate
            .forward(Tensor::cat(vec![input, hidden.clone() * r], 1))
            .tanh();
        let keep = z.ones_like() - z.clone();
        candidate * keep + hidden * z
    }

    /// Zero state for a batch of the given spatial extent.
    pub fn init_state(
        &self,
        batch: usize,
        height: usize,
        width: usize,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        Tensor::zeros([batch, self.hidden_channels, height, width], device)
    }
}

/// Configuration for [`Conv2dGru`].
#[derive(Config, Debug)]
pub struct Conv2dGruConfig {
    /// Input channel count.
    pub in_channels: usize,
    /// Hidden channel count shared by all layers.
    pub hidden_channels: usize,
    /// Output channel count.
    pub out_channels: usize,
    /// Number of stacked cells.
    #[config(default = 2)]
    pub num_layers: usize,
    /// Gate convolution kernel size.
    #[config(default = 3)]
    pub kernel_size: usize,
    /// Learn bias terms.
    #[config(default = true)]
    pub bias: bool,
}

impl Conv2dGruConfig {
    /// Initialize the stack on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Conv2dGru<B> {
        assert!(self.num_layers > 0, "Conv2dGru needs at least one layer");
        let cells = (0..self.num_layers)
            .map(|i| {
                let in_channels = if i == 0 {
                    self.in_channels
                } else {
                    self.hidden_channels
                };
                ConvGruCellConfig::new(in_channels, self.hidden_channels)
                    .with_kernel_size(self.kernel_size)
                    .with_bias(self.bias)
                    .init(device)
            })
            .collect();
        let out_conv = gate_conv2d::<B>(
            self.hidden_channels,
            self.out_channels,
            self.kernel_size,
            1,
            self.bias,
            device,
        );
        Conv2dGru { cells, out_conv }
    }
}

/// Multi-layer convolutional GRU with a linear output convolution.
#[derive(Module, Debug)]
pub struct Conv2dGru<B: Backend> {
    pub cells: Vec<ConvGruCell<B>>,
    out_conv: Conv2d<B>,
}

impl<B: Backend> Conv2dGru<B> {
    /// One recurrence step. `None` hidden state initializes to zeros.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        hidden: Option<HiddenState<B>>,
    ) -> (Tensor<B, 4>, HiddenState<B>) {
        let [batch, _, height, width] = input.dims();
        let device = input.device();
        let mut state = hidden.unwrap_or_else(|| {
            self.cells
                .iter()
                .map(|cell| cell.init_state(batch, height, width, &device))
                .collect()
        });

        let mut x = input;
        for (cell, slot) in self.cells.iter().zip(state.iter_mut()) {
            let next = cell.forward(x, slot.clone());
            x = next.clone();
            *slot = next;
        }

        (self.out_conv.forward(x), state)
    }
}

/// Configuration for [`ConvRnnStack`].
///
/// All vectors must share one length; stage `i` is a convolution into
/// `conv_filters[i]` channels followed, when `recurrent_filters[i]` is
/// non-zero, by a GRU cell of that width. A zero entry means the stage is
/// purely convolutional; the conventional output stage is a trailing
/// convolution with no recurrence.
#[derive(Config, Debug)]
pub struct ConvRnnStackConfig {
    /// Input channel count.
    pub in_channels: usize,
    /// Convolution widths per stage.
    pub conv_filters: Vec<usize>,
    /// Convolution kernel sizes per stage.
    pub conv_kernels: Vec<usize>,
    /// Convolution dilations per stage.
    pub conv_dilations: Vec<usize>,
    /// Convolution bias switches per stage.
    pub conv_bias: Vec<bool>,
    /// Recurrent widths per stage (zero disables recurrence for the stage).
    pub recurrent_filters: Vec<usize>,
    /// Recurrent kernel sizes per stage.
    pub recurrent_kernels: Vec<usize>,
    /// Recurrent dilations per stage.
    pub recurrent_dilations: Vec<usize>,
    /// Recurrent bias switches per stage.
    pub recurrent_bias: Vec<bool>,
}

impl ConvRnnStackConfig {
    /// A compact stack for the recurrent inference cascades: two hidden
    /// conv+GRU stages and a linear output convolution.
    pub fn rim_default(in_channels: usize, width: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            conv_filters: vec![width, width, out_channels],
            conv_kernels: vec![5, 3, 3],
            conv_dilations: vec![1, 2, 1],
            conv_bias: vec![true, true, false],
            recurrent_filters: vec![width, width, 0],
            recurrent_kernels: vec![1, 1, 0],
            recurrent_dilations: vec![1, 1, 0],
            recurrent_bias: vec![true, true, false],
        }
    }

    /// Initialize the stack on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvRnnStack<B> {
        let stages = self.conv_filters.len();
        for (name, len) in [
            ("conv_kernels", self.conv_kernels.len()),
            ("conv_dilations", self.conv_dilations.len()),
            ("conv_bias", self.conv_bias.len()),
            ("recurrent_filters", self.recurrent_filters.len()),
            ("recurrent_kernels", self.recurrent_kernels.len()),
            ("recurrent_dilations", self.recurrent_dilations.len()),
            ("recurrent_bias", self.recurrent_bias.len()),
        ] {
            assert_eq!(len, stages, "`{name}` must list one entry per stage ({stages}), got {len}");
        }

        let mut convs = Vec::with_capacity(stages);
        let mut cells = Vec::with_capacity(stages);
        let mut in_channels = self.in_channels;
        for i in 0..stages {
            convs.push(gate_conv2d::<B>(
                in_channels,
                self.conv_filters[i],
                self.conv_kernels[i],
                self.conv_dilations[i],
                self.conv_bias[i],
                device,
            ));
            in_channels = self.conv_filters[i];

            if self.recurrent_filters[i] > 0 {
                cells.push(Some(
                    ConvGruCellConfig::new(in_channels, self.recurrent_filters[i])
                        .with_kernel_size(self.recurrent_kernels[i])
                        .with_dilation(self.recurrent_dilations[i])
                        .with_bias(self.recurrent_bias[i])
                        .init(device),
                ));
                in_channels = self.recurrent_filters[i];
            } else {
                cells.push(None);
            }
        }

        ConvRnnStack {
            convs,
            cells,
            out_channels: in_channels,
        }
    }
}

/// Interleaved convolution + GRU stages producing an incremental correction.
#[derive(Module, Debug)]
pub struct ConvRnnStack<B: Backend> {
    convs: Vec<Conv2d<B>>,
    cells: Vec<Option<ConvGruCell<B>>>,
    pub out_channels: usize,
}

impl<B: Backend> ConvRnnStack<B> {
    /// Zero hidden states, one per recurrent stage.
    pub fn init_states(
        &self,
        batch: usize,
        height: usize,
        width: usize,
        device: &B::Device,
    ) -> HiddenState<B> {
        self.cells
            .iter()
            .flatten()
            .map(|cell| cell.init_state(batch, height, width, device))
            .collect()
    }

    /// One step through every stage. ReLU follows each hidden convolution;
    /// the final stage stays linear.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        mut states: HiddenState<B>,
    ) -> (Tensor<B, 4>, HiddenState<B>) {
        let last = self.convs.len() - 1;
        let mut x = input;
        let mut state_idx = 0;
        for (i, (conv, cell)) in self.convs.iter().zip(self.cells.iter()).enumerate() {
            x = conv.forward(x);
            if i < last {
                x = activation::relu(x);
            }
            if let Some(cell) = cell {
                let next = cell.forward(x, states[state_idx].clone());
                x = next.clone();
                states[state_idx] = next;
                state_idx += 1;
            }
        }
        (x, states)
    }
}
