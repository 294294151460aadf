//! Coordinator configuration.
//!
//! Layered with the `config` crate: built-in defaults, then the file named by
//! `SECAGG_CONFIG_FILE` (yaml, toml or json), then `SECAGG__*` environment
//! variables.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::crypto_he::MaskedSumScheme;
use crate::federated_learning::Tensor;

pub const DEFAULT_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParameterConfig {
    pub name: String,
    pub len: usize,
    #[serde(default)]
    pub init: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub service_name: String,
    pub listen_addr: String,
    pub aggregation_threshold: usize,
    #[serde(default)]
    pub scheme_key_hex: Option<String>,
    #[serde(default)]
    pub nats_url: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            service_name: "secagg-coordinator".into(),
            listen_addr: "0.0.0.0:8080".into(),
            aggregation_threshold: DEFAULT_THRESHOLD,
            scheme_key_hex: None,
            nats_url: None,
            parameters: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.aggregation_threshold < 2 {
            bail!("aggregation_threshold must be at least 2, got {}", self.aggregation_threshold);
        }
        if self.parameters.is_empty() { bail!("at least one model parameter must be configured"); }
        let mut seen = BTreeSet::new();
        for p in &self.parameters {
            if p.name.trim().is_empty() { bail!("parameter names must not be empty"); }
            if p.len == 0 { bail!("parameter {} has zero length", p.name); }
            if !seen.insert(p.name.as_str()) { bail!("duplicate parameter {}", p.name); }
        }
        if let Some(key) = &self.scheme_key_hex { MaskedSumScheme::from_hex(key)?; }
        Ok(())
    }

    /// Initial tensors for the in-memory model.
    pub fn initial_model(&self) -> BTreeMap<String, Tensor> {
        self.parameters.iter().map(|p| (p.name.clone(), vec![p.init; p.len])).collect()
    }

    pub fn scheme(&self) -> Result<MaskedSumScheme> {
        let key = self.scheme_key_hex.as_deref().context("scheme_key_hex is not configured")?;
        Ok(MaskedSumScheme::from_hex(key)?)
    }
}

pub fn load_config(service: &str) -> Result<CoordinatorConfig> {
    let defaults = CoordinatorConfig::default();
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("listen_addr", defaults.listen_addr)?
        .set_default("aggregation_threshold", defaults.aggregation_threshold as u64)?;
    if let Ok(file) = std::env::var("SECAGG_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(true));
    }
    builder = builder.add_source(config::Environment::with_prefix("SECAGG").separator("__"));
    let cfg: CoordinatorConfig = builder.build()?.try_deserialize().context("invalid coordinator configuration")?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn from_yaml_str(text: &str) -> Result<CoordinatorConfig> {
    let cfg: CoordinatorConfig = config::Config::builder()
        .set_default("service_name", "secagg-coordinator")?
        .set_default("listen_addr", "0.0.0.0:8080")?
        .set_default("aggregation_threshold", DEFAULT_THRESHOLD as u64)?
        .add_source(config::File::from_str(text, config::FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
