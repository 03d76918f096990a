//! Run filter: rejects grid points whose coupled parameters make no sense.
//!
//! A full cartesian grid pairs every optimizer with every momentum and every
//! activation with every init scheme. Most of those pairs either duplicate
//! another run (momentum does nothing for Adam) or are a poor fit (Kaiming
//! init under Tanh). Three compatibility tables encode which dependent
//! values each governing value permits; a combination outside any table is
//! skipped before anything is built.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use velsweep_core::config::CompatibilityConfig;

use crate::error::{MlError, Result};
use crate::hyperparams::{ActivationFn, OptimizerKind, RunConfig, WeightInit};
use crate::training::sweep::HyperparameterGrid;

/// Permitted dependent values per governing value.
///
/// A governing value with no entry permits nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityTable<G: Ord, D> {
    entries: BTreeMap<G, Vec<D>>,
}

impl<G: Ord, D: PartialEq> CompatibilityTable<G, D> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, governing: G, permitted: Vec<D>) -> Self {
        self.entries.insert(governing, permitted);
        self
    }

    pub fn permitted(&self, governing: &G) -> &[D] {
        self.entries.get(governing).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn permits(&self, governing: &G, dependent: &D) -> bool {
        self.permitted(governing).contains(dependent)
    }
}

impl<G: Ord, D: PartialEq> Default for CompatibilityTable<G, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three tables the filter consults.
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityTables {
    pub activation_init: CompatibilityTable<ActivationFn, WeightInit>,
    pub optimizer_weight_decay: CompatibilityTable<OptimizerKind, f64>,
    pub optimizer_momentum: CompatibilityTable<OptimizerKind, f64>,
}

impl CompatibilityTables {
    /// Activation families paired with the init schemes scaled for them.
    pub fn default_activation_init() -> CompatibilityTable<ActivationFn, WeightInit> {
        use WeightInit::*;
        let rectifier = vec![Uniform, KaimingUniform, KaimingNormal];
        let saturating = vec![Uniform, XavierUniform, XavierNormal];
        CompatibilityTable::new()
            .with(ActivationFn::Relu, rectifier.clone())
            .with(ActivationFn::LeakyRelu, rectifier.clone())
            .with(ActivationFn::Tanh, saturating.clone())
            .with(ActivationFn::Sigmoid, saturating)
            .with(ActivationFn::Swish, rectifier.clone())
            .with(ActivationFn::Mish, rectifier)
    }

    /// Optimizer tables from the grid's candidate lists. Optimizers that
    /// ignore a parameter only permit its first listed value, so they run once.
    pub fn derive(weight_decays: &[f64], momenta: &[f64]) -> Self {
        let first = |values: &[f64]| values.first().copied().into_iter().collect::<Vec<_>>();

        let mut optimizer_weight_decay = CompatibilityTable::new();
        let mut optimizer_momentum = CompatibilityTable::new();
        for kind in OptimizerKind::ALL {
            let decays = if kind.uses_weight_decay() {
                weight_decays.to_vec()
            } else {
                first(weight_decays)
            };
            let momentum = if kind.uses_momentum() {
                momenta.to_vec()
            } else {
                first(momenta)
            };
            optimizer_weight_decay = optimizer_weight_decay.with(kind, decays);
            optimizer_momentum = optimizer_momentum.with(kind, momentum);
        }

        Self {
            activation_init: Self::default_activation_init(),
            optimizer_weight_decay,
            optimizer_momentum,
        }
    }

    /// Derive the tables from a grid's `weight_decay` and `momentum` lists.
    pub fn from_grid(grid: &HyperparameterGrid) -> Result<Self> {
        let floats = |name: &str| -> Result<Vec<f64>> {
            grid.values(name)
                .ok_or_else(|| MlError::MissingParameter(name.to_string()))?
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| MlError::config(format!("'{name}' value {v} is not a number")))
                })
                .collect()
        };
        Ok(Self::derive(&floats("weight_decay")?, &floats("momentum")?))
    }

    /// Replace derived tables with explicitly configured ones.
    pub fn with_overrides(mut self, overrides: &CompatibilityConfig) -> Result<Self> {
        if let Some(table) = &overrides.activation_init {
            let mut parsed = CompatibilityTable::new();
            for (activation, inits) in table {
                let inits = inits
                    .iter()
                    .map(|s| s.parse())
                    .collect::<Result<Vec<WeightInit>>>()?;
                parsed = parsed.with(activation.parse()?, inits);
            }
            self.activation_init = parsed;
        }
        if let Some(table) = &overrides.optimizer_weight_decay {
            self.optimizer_weight_decay = parse_optimizer_table(table)?;
        }
        if let Some(table) = &overrides.optimizer_momentum {
            self.optimizer_momentum = parse_optimizer_table(table)?;
        }
        Ok(self)
    }
}

fn parse_optimizer_table(
    table: &BTreeMap<String, Vec<f64>>,
) -> Result<CompatibilityTable<OptimizerKind, f64>> {
    table
        .iter()
        .try_fold(CompatibilityTable::new(), |acc, (name, values)| {
            Ok(acc.with(name.parse()?, values.clone()))
        })
}

/// Why a combination was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub governing: &'static str,
    pub governing_value: String,
    pub dependent: &'static str,
    pub dependent_value: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={} does not permit {}={}",
            self.governing, self.governing_value, self.dependent, self.dependent_value
        )
    }
}

/// Filter decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Checks combinations against the compatibility tables.
#[derive(Debug, Clone)]
pub struct RunFilter {
    tables: CompatibilityTables,
}

impl RunFilter {
    pub fn new(tables: CompatibilityTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &CompatibilityTables {
        &self.tables
    }

    pub fn check(&self, config: &RunConfig) -> Verdict {
        let t = &self.tables;
        if !t
            .activation_init
            .permits(&config.activation_fn, &config.weights_init)
        {
            return reject(
                "activation_fn",
                config.activation_fn,
                "weights_init",
                config.weights_init,
            );
        }
        if !t
            .optimizer_weight_decay
            .permits(&config.optimizer, &config.weight_decay)
        {
            return reject(
                "optimizer",
                config.optimizer,
                "weight_decay",
                Value::from(config.weight_decay),
            );
        }
        if !t
            .optimizer_momentum
            .permits(&config.optimizer, &config.momentum)
        {
            return reject(
                "optimizer",
                config.optimizer,
                "momentum",
                Value::from(config.momentum),
            );
        }
        Verdict::Accept
    }
}

fn reject(
    governing: &'static str,
    governing_value: impl fmt::Display,
    dependent: &'static str,
    dependent_value: impl fmt::Display,
) -> Verdict {
    Verdict::Reject(Rejection {
        governing,
        governing_value: governing_value.to_string(),
        dependent,
        dependent_value: dependent_value.to_string(),
    })
}
