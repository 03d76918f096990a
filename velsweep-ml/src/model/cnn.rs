use burn::{
    module::{Ignored, Module},
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        loss::{MseLoss, Reduction},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    record::{CompactRecorder, FileRecorder, Recorder},
    tensor::{Tensor, activation as act, backend::Backend},
};
use std::path::{Path, PathBuf};

use crate::error::{MlError, Result};
use crate::hyperparams::{ActivationFn, KernelSize, RunConfig, WeightInit};

/// Type name used in checkpoint file names.
pub const MODEL_NAME: &str = "SpectrogramCnn";

/// Architecture of a [`SpectrogramCnn`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramCnnConfig {
    pub input_height: usize,
    pub input_width: usize,
    pub num_conv_layers: usize,
    pub num_fc_layers: usize,
    /// Channels of the first conv layer; each later layer doubles it.
    pub out_channels: usize,
    pub kernel_size: KernelSize,
    pub stride: usize,
    pub padding: usize,
    pub pooling_size: usize,
    pub hidden_units: usize,
    pub conv_dropout: f64,
    pub linear_dropout: f64,
    pub use_cnn_batchnorm: bool,
    pub use_fc_batchnorm: bool,
    pub activation: ActivationFn,
    pub weights_init: WeightInit,
}

/// Output length of a conv along one axis, `None` once it collapses.
fn conv_out(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = input + 2 * padding;
    (padded >= kernel).then(|| (padded - kernel) / stride + 1)
}

fn initializer(scheme: WeightInit, fan_in: usize) -> Initializer {
    match scheme {
        WeightInit::Uniform => {
            let bound = 1.0 / (fan_in as f64).sqrt();
            Initializer::Uniform {
                min: -bound,
                max: bound,
            }
        }
        WeightInit::XavierUniform => Initializer::XavierUniform { gain: 1.0 },
        WeightInit::XavierNormal => Initializer::XavierNormal { gain: 1.0 },
        WeightInit::KaimingUniform => Initializer::KaimingUniform {
            gain: std::f64::consts::SQRT_2,
            fan_out_only: false,
        },
        WeightInit::KaimingNormal => Initializer::KaimingNormal {
            gain: std::f64::consts::SQRT_2,
            fan_out_only: false,
        },
    }
}

impl SpectrogramCnnConfig {
    pub fn from_run(run: &RunConfig, input_height: usize, input_width: usize) -> Self {
        Self {
            input_height,
            input_width,
            num_conv_layers: run.num_conv_layers,
            num_fc_layers: run.num_fc_layers,
            out_channels: run.out_channels,
            kernel_size: run.kernel_size,
            stride: run.stride,
            padding: run.padding,
            pooling_size: run.pooling_size,
            hidden_units: run.hidden_units,
            conv_dropout: run.conv_dropout,
            linear_dropout: run.linear_dropout,
            use_cnn_batchnorm: run.use_cnn_batchnorm,
            use_fc_batchnorm: run.use_fc_batchnorm,
            activation: run.activation_fn,
            weights_init: run.weights_init,
        }
    }

    fn conv_channels(&self, layer: usize) -> usize {
        self.out_channels << layer
    }

    /// `(channels, height, width)` after the conv stack.
    pub fn feature_shape(&self) -> Result<(usize, usize, usize)> {
        if self.stride == 0 || self.pooling_size == 0 {
            return Err(MlError::config("stride and pooling_size must be at least 1"));
        }
        if self.num_conv_layers > 0 && self.out_channels == 0 {
            return Err(MlError::config("out_channels must be at least 1"));
        }

        let (mut h, mut w, mut channels) = (self.input_height, self.input_width, 1);
        for layer in 0..self.num_conv_layers {
            let collapsed = || {
                MlError::config(format!(
                    "conv layer {} shrinks the {}x{} feature map to nothing \
                     (kernel {}, stride {}, padding {}, pool {})",
                    layer + 1,
                    h,
                    w,
                    self.kernel_size,
                    self.stride,
                    self.padding,
                    self.pooling_size
                ))
            };
            let ch = conv_out(h, self.kernel_size.height, self.stride, self.padding)
                .ok_or_else(collapsed)?
                / self.pooling_size;
            let cw = conv_out(w, self.kernel_size.width, self.stride, self.padding)
                .ok_or_else(collapsed)?
                / self.pooling_size;
            if ch == 0 || cw == 0 {
                return Err(collapsed());
            }
            (h, w, channels) = (ch, cw, self.conv_channels(layer));
        }
        Ok((channels, h, w))
    }

    fn validate(&self) -> Result<usize> {
        if self.num_fc_layers == 0 {
            return Err(MlError::config("num_fc_layers must be at least 1"));
        }
        if self.num_fc_layers > 1 && self.hidden_units == 0 {
            return Err(MlError::config("hidden_units must be at least 1"));
        }
        for (name, p) in [
            ("conv_dropout", self.conv_dropout),
            ("linear_dropout", self.linear_dropout),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(MlError::config(format!("{name} {p} is not a probability")));
            }
        }
        let (c, h, w) = self.feature_shape()?;
        Ok(c * h * w)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SpectrogramCnn<B>> {
        let flat_features = self.validate()?;
        let (kh, kw) = (self.kernel_size.height, self.kernel_size.width);

        let conv_blocks = (0..self.num_conv_layers)
            .map(|layer| {
                let in_channels = if layer == 0 { 1 } else { self.conv_channels(layer - 1) };
                let out_channels = self.conv_channels(layer);
                ConvBlock {
                    conv: Conv2dConfig::new([in_channels, out_channels], [kh, kw])
                        .with_stride([self.stride, self.stride])
                        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
                        .with_initializer(initializer(self.weights_init, in_channels * kh * kw))
                        .init(device),
                    norm: self
                        .use_cnn_batchnorm
                        .then(|| BatchNormConfig::new(out_channels).init(device)),
                    pool: MaxPool2dConfig::new([self.pooling_size, self.pooling_size])
                        .with_strides([self.pooling_size, self.pooling_size])
                        .init(),
                    dropout: DropoutConfig::new(self.conv_dropout).init(),
                    activation: Ignored(self.activation),
                }
            })
            .collect();

        let mut in_features = flat_features;
        let fc_blocks = (1..self.num_fc_layers)
            .map(|_| {
                let block = FcBlock {
                    linear: LinearConfig::new(in_features, self.hidden_units)
                        .with_initializer(initializer(self.weights_init, in_features))
                        .init(device),
                    norm: self
                        .use_fc_batchnorm
                        .then(|| BatchNormConfig::new(self.hidden_units).init(device)),
                    dropout: DropoutConfig::new(self.linear_dropout).init(),
                    activation: Ignored(self.activation),
                };
                in_features = self.hidden_units;
                block
            })
            .collect();

        let head = LinearConfig::new(in_features, 1)
            .with_initializer(initializer(self.weights_init, in_features))
            .init(device);

        Ok(SpectrogramCnn {
            conv_blocks,
            fc_blocks,
            head,
        })
    }

    /// Rebuild the model and load weights written by [`SpectrogramCnn::save`].
    pub fn load<B: Backend>(&self, path: &Path, device: &B::Device) -> Result<SpectrogramCnn<B>> {
        let record = CompactRecorder::new()
            .load(path.to_path_buf(), device)
            .map_err(|e| MlError::checkpoint(format!("cannot load {}: {e:?}", path.display())))?;
        Ok(self.init(device)?.load_record(record))
    }
}

fn activate<B: Backend, const D: usize>(activation: ActivationFn, x: Tensor<B, D>) -> Tensor<B, D> {
    match activation {
        ActivationFn::Relu => act::relu(x),
        ActivationFn::LeakyRelu => act::leaky_relu(x, 0.01),
        ActivationFn::Tanh => act::tanh(x),
        ActivationFn::Sigmoid => act::sigmoid(x),
        ActivationFn::Swish => act::silu(x),
        ActivationFn::Mish => act::mish(x),
    }
}

/// conv -> batchnorm -> activation -> maxpool -> dropout
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    pool: MaxPool2d,
    dropout: Dropout,
    activation: Ignored<ActivationFn>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        let x = activate(self.activation.0, x);
        let x = self.pool.forward(x);
        self.dropout.forward(x)
    }
}

/// linear -> batchnorm -> activation -> dropout
#[derive(Module, Debug)]
pub struct FcBlock<B: Backend> {
    linear: Linear<B>,
    norm: Option<BatchNorm<B, 1>>,
    dropout: Dropout,
    activation: Ignored<ActivationFn>,
}

impl<B: Backend> FcBlock<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = match &self.norm {
            Some(norm) => {
                let [n, features] = x.dims();
                norm.forward(x.reshape([n, features, 1])).reshape([n, features])
            }
            None => x,
        };
        let x = activate(self.activation.0, x);
        self.dropout.forward(x)
    }
}

/// Spectrogram to radial velocity regressor.
#[derive(Module, Debug)]
pub struct SpectrogramCnn<B: Backend> {
    conv_blocks: Vec<ConvBlock<B>>,
    fc_blocks: Vec<FcBlock<B>>,
    head: Linear<B>,
}

impl<B: Backend> SpectrogramCnn<B> {
    /// `[batch, 1, height, width]` -> `[batch]`
    pub fn forward(&self, spectrogram: Tensor<B, 4>) -> Tensor<B, 1> {
        let mut x = spectrogram;
        for block in &self.conv_blocks {
            x = block.forward(x);
        }

        let [n, c, h, w] = x.dims();
        let mut x = x.reshape([n, c * h * w]);
        for block in &self.fc_blocks {
            x = block.forward(x);
        }
        self.head.forward(x).reshape([n])
    }

    /// Mean squared error.
    pub fn loss(&self, prediction: Tensor<B, 1>, target: Tensor<B, 1>) -> Tensor<B, 1> {
        MseLoss::new().forward(prediction, target, Reduction::Mean)
    }

    /// Write the weights under `path`; returns the file actually created.
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let recorder = CompactRecorder::new();
        recorder
            .record(self.clone().into_record(), path.to_path_buf())
            .map_err(|e| MlError::checkpoint(format!("cannot save {}: {e:?}", path.display())))?;
        Ok(path.with_extension(<CompactRecorder as FileRecorder<B>>::file_extension()))
    }
}
