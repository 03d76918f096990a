//! Typed hyperparameters.
//!
//! A [`Combination`] carries loosely typed JSON values straight from the
//! grid. [`RunConfig::from_combination`] turns it into closed enums and
//! plain numbers, so an unknown activation, init scheme, optimizer, or
//! kernel shape fails here instead of deep inside model construction.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;

use crate::error::{MlError, Result};
use crate::training::sweep::Combination;

/// Activation function applied after every conv and hidden linear layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActivationFn {
    #[serde(rename = "ReLU")]
    Relu,
    #[serde(rename = "LeakyReLU")]
    LeakyRelu,
    Tanh,
    Sigmoid,
    Swish,
    Mish,
}

impl ActivationFn {
    pub const ALL: [ActivationFn; 6] = [
        Self::Relu,
        Self::LeakyRelu,
        Self::Tanh,
        Self::Sigmoid,
        Self::Swish,
        Self::Mish,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Relu => "ReLU",
            Self::LeakyRelu => "LeakyReLU",
            Self::Tanh => "Tanh",
            Self::Sigmoid => "Sigmoid",
            Self::Swish => "Swish",
            Self::Mish => "Mish",
        }
    }
}

/// Weight initialization scheme for conv and linear parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WeightInit {
    Uniform,
    #[serde(rename = "Xavier_uniform")]
    XavierUniform,
    #[serde(rename = "Xavier_normal")]
    XavierNormal,
    #[serde(rename = "Kaiming_uniform")]
    KaimingUniform,
    #[serde(rename = "Kaiming_normal")]
    KaimingNormal,
}

impl WeightInit {
    pub const ALL: [WeightInit; 5] = [
        Self::Uniform,
        Self::XavierUniform,
        Self::XavierNormal,
        Self::KaimingUniform,
        Self::KaimingNormal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Uniform => "Uniform",
            Self::XavierUniform => "Xavier_uniform",
            Self::XavierNormal => "Xavier_normal",
            Self::KaimingUniform => "Kaiming_uniform",
            Self::KaimingNormal => "Kaiming_normal",
        }
    }
}

/// Optimizer family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "SGD")]
    Sgd,
    Adam,
    AdamW,
    AdaGrad,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 4] = [Self::Sgd, Self::Adam, Self::AdamW, Self::AdaGrad];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sgd => "SGD",
            Self::Adam => "Adam",
            Self::AdamW => "AdamW",
            Self::AdaGrad => "AdaGrad",
        }
    }

    /// Whether the optimizer consumes the `weight_decay` hyperparameter.
    pub fn uses_weight_decay(self) -> bool {
        matches!(self, Self::Sgd | Self::AdamW)
    }

    /// Whether the optimizer consumes the `momentum` hyperparameter.
    pub fn uses_momentum(self) -> bool {
        matches!(self, Self::Sgd)
    }
}

macro_rules! impl_named {
    ($ty:ty, $param:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = MlError;

            fn from_str(s: &str) -> Result<Self> {
                Self::ALL
                    .into_iter()
                    .find(|v| v.name() == s)
                    .ok_or_else(|| MlError::unrecognized($param, s))
            }
        }
    };
}

impl_named!(ActivationFn, "activation_fn");
impl_named!(WeightInit, "weights_init");
impl_named!(OptimizerKind, "optimizer");

/// Convolution kernel shape, written `"HxW"` in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelSize {
    pub height: usize,
    pub width: usize,
}

impl KernelSize {
    /// Every shape the sweep accepts.
    pub const SUPPORTED: [(usize, usize); 11] = [
        (3, 3),
        (5, 5),
        (7, 7),
        (1, 3),
        (3, 1),
        (3, 5),
        (5, 3),
        (3, 7),
        (7, 3),
        (5, 7),
        (7, 5),
    ];
}

impl FromStr for KernelSize {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = s
            .split_once('x')
            .and_then(|(h, w)| Some((h.parse().ok()?, w.parse().ok()?)));
        match parsed {
            Some((height, width)) if Self::SUPPORTED.contains(&(height, width)) => {
                Ok(Self { height, width })
            }
            _ => Err(MlError::unrecognized("kernel_size", s)),
        }
    }
}

impl fmt::Display for KernelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// One fully typed grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub conv_dropout: f64,
    pub linear_dropout: f64,
    pub kernel_size: KernelSize,
    pub hidden_units: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub num_conv_layers: usize,
    pub num_fc_layers: usize,
    pub stride: usize,
    pub padding: usize,
    pub pooling_size: usize,
    pub out_channels: usize,
    pub activation_fn: ActivationFn,
    pub weights_init: WeightInit,
    pub use_cnn_batchnorm: bool,
    pub use_fc_batchnorm: bool,
    pub optimizer: OptimizerKind,
    pub weight_decay: f64,
    pub momentum: f64,
}

impl RunConfig {
    /// Grid parameters every run reads.
    pub const PARAMETERS: [&'static str; 20] = [
        "conv_dropout",
        "linear_dropout",
        "kernel_size",
        "hidden_units",
        "learning_rate",
        "epochs",
        "batch_size",
        "num_conv_layers",
        "num_fc_layers",
        "stride",
        "padding",
        "pooling_size",
        "out_channels",
        "activation_fn",
        "weights_init",
        "use_cnn_batchnorm",
        "use_fc_batchnorm",
        "optimizer",
        "weight_decay",
        "momentum",
    ];

    pub fn from_combination(combination: &Combination) -> Result<Self> {
        Ok(Self {
            conv_dropout: number(combination, "conv_dropout")?,
            linear_dropout: number(combination, "linear_dropout")?,
            kernel_size: named(combination, "kernel_size")?,
            hidden_units: number(combination, "hidden_units")?,
            learning_rate: number(combination, "learning_rate")?,
            epochs: number(combination, "epochs")?,
            batch_size: number(combination, "batch_size")?,
            num_conv_layers: number(combination, "num_conv_layers")?,
            num_fc_layers: number(combination, "num_fc_layers")?,
            stride: number(combination, "stride")?,
            padding: number(combination, "padding")?,
            pooling_size: number(combination, "pooling_size")?,
            out_channels: number(combination, "out_channels")?,
            activation_fn: named(combination, "activation_fn")?,
            weights_init: named(combination, "weights_init")?,
            use_cnn_batchnorm: number(combination, "use_cnn_batchnorm")?,
            use_fc_batchnorm: number(combination, "use_fc_batchnorm")?,
            optimizer: named(combination, "optimizer")?,
            weight_decay: number(combination, "weight_decay")?,
            momentum: number(combination, "momentum")?,
        })
    }
}

fn value<'a>(combination: &'a Combination, name: &str) -> Result<&'a serde_json::Value> {
    combination
        .get(name)
        .ok_or_else(|| MlError::MissingParameter(name.to_string()))
}

/// Plain scalar (number or bool) parameter.
fn number<T: DeserializeOwned>(combination: &Combination, name: &str) -> Result<T> {
    let raw = value(combination, name)?;
    T::deserialize(raw)
        .map_err(|e| MlError::config(format!("invalid value {raw} for '{name}': {e}")))
}

/// Parameter selected by name from a closed set.
fn named<T: FromStr<Err = MlError>>(combination: &Combination, name: &str) -> Result<T> {
    let raw = value(combination, name)?;
    match raw.as_str() {
        Some(s) => s.parse(),
        None => Err(MlError::unrecognized(name, raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::sweep::HyperparameterGrid;

    fn reference_combination() -> Combination {
        let grid = HyperparameterGrid::new(velsweep_core::config::default_grid()).unwrap();
        grid.combinations().next().unwrap()
    }

    #[test]
    fn test_parse_reference_grid_point() {
        let config = RunConfig::from_combination(&reference_combination()).unwrap();
        assert_eq!(config.kernel_size, KernelSize { height: 5, width: 7 });
        assert_eq!(config.activation_fn, ActivationFn::Relu);
        assert_eq!(config.weights_init, WeightInit::Uniform);
        assert_eq!(config.optimizer, OptimizerKind::Sgd);
        assert_eq!(config.conv_dropout, 0.0);
        assert_eq!(config.momentum, 0.8);
        assert!(config.use_cnn_batchnorm);
    }

    #[test]
    fn test_unknown_activation_is_fatal() {
        let combination = reference_combination().with("activation_fn", "GELU");
        let err = RunConfig::from_combination(&combination).unwrap_err();
        assert!(
            matches!(err, MlError::UnrecognizedName { ref parameter, ref value }
                if parameter == "activation_fn" && value == "GELU")
        );
    }

    #[test]
    fn test_unsupported_kernel_is_fatal() {
        for bad in ["9x9", "3by3", "x", "5x"] {
            let combination = reference_combination().with("kernel_size", bad);
            assert!(matches!(
                RunConfig::from_combination(&combination),
                Err(MlError::UnrecognizedName { .. })
            ));
        }
    }

    #[test]
    fn test_missing_parameter() {
        let combination = reference_combination().without("momentum");
        assert!(matches!(
            RunConfig::from_combination(&combination),
            Err(MlError::MissingParameter(name)) if name == "momentum"
        ));
    }

    #[test]
    fn test_names_round_trip_through_from_str() {
        for a in ActivationFn::ALL {
            assert_eq!(a.name().parse::<ActivationFn>().unwrap(), a);
        }
        for w in WeightInit::ALL {
            assert_eq!(w.to_string().parse::<WeightInit>().unwrap(), w);
        }
        for o in OptimizerKind::ALL {
            assert_eq!(o.name().parse::<OptimizerKind>().unwrap(), o);
        }
        for (h, w) in KernelSize::SUPPORTED {
            let k: KernelSize = format!("{h}x{w}").parse().unwrap();
            assert_eq!((k.height, k.width), (h, w));
        }
    }

    #[test]
    fn test_serde_names_match_grid_spelling() {
        assert_eq!(
            serde_json::to_value(WeightInit::KaimingUniform).unwrap(),
            serde_json::json!("Kaiming_uniform")
        );
        assert_eq!(
            serde_json::to_value(ActivationFn::LeakyRelu).unwrap(),
            serde_json::json!("LeakyReLU")
        );
    }

    #[test]
    fn test_optimizer_parameter_usage() {
        assert!(OptimizerKind::Sgd.uses_momentum());
        assert!(!OptimizerKind::AdamW.uses_momentum());
        assert!(OptimizerKind::AdamW.uses_weight_decay());
        assert!(!OptimizerKind::Adam.uses_weight_decay());
    }
}
