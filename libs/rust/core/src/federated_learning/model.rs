//! Global model store boundary.
//!
//! The coordinator only needs to list parameter names, read a tensor, and
//! subtract an update. [`GlobalModelStore::subtract_all`] applies a whole round
//! at once so readers never see half an update.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::ModelError;

pub type Tensor = Vec<f64>;
pub type ModelVersion = u64;

pub trait GlobalModelStore: Send + Sync {
    fn parameter_names(&self) -> BTreeSet<String>;
    fn get(&self, name: &str) -> Option<Tensor>;
    fn subtract_in_place(&self, name: &str, delta: &[f64]) -> Result<(), ModelError>;
    /// All-or-nothing: either every entry of `deltas` is applied or none is.
    fn subtract_all(&self, deltas: &BTreeMap<String, Tensor>) -> Result<ModelVersion, ModelError>;
    fn version(&self) -> ModelVersion;
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub version: ModelVersion,
    pub parameters: BTreeMap<String, Tensor>,
}

#[derive(Debug)]
struct Inner {
    version: ModelVersion,
    parameters: BTreeMap<String, Tensor>,
}

#[derive(Debug)]
pub struct InMemoryModel {
    inner: RwLock<Inner>,
}

impl InMemoryModel {
    pub fn new(parameters: BTreeMap<String, Tensor>) -> Self {
        Self { inner: RwLock::new(Inner { version: 1, parameters }) }
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let inner = self.inner.read();
        ModelSnapshot { version: inner.version, parameters: inner.parameters.clone() }
    }

    /// Replaces a tensor, possibly changing the model's shape.
    pub fn insert(&self, name: impl Into<String>, tensor: Tensor) {
        let mut inner = self.inner.write();
        inner.parameters.insert(name.into(), tensor);
        inner.version += 1;
    }
}

fn check_shape(parameters: &BTreeMap<String, Tensor>, name: &str, delta: &[f64]) -> Result<(), ModelError> {
    let current = parameters.get(name).ok_or_else(|| ModelError::UnknownParameter(name.to_string()))?;
    if current.len() != delta.len() {
        return Err(ModelError::ShapeMismatch { name: name.to_string(), expected: current.len(), actual: delta.len() });
    }
    Ok(())
}

fn subtract(tensor: &mut [f64], delta: &[f64]) {
    for (w, d) in tensor.iter_mut().zip(delta) { *w -= *d; }
}

impl GlobalModelStore for InMemoryModel {
    fn parameter_names(&self) -> BTreeSet<String> { self.inner.read().parameters.keys().cloned().collect() }

    fn get(&self, name: &str) -> Option<Tensor> { self.inner.read().parameters.get(name).cloned() }

    fn subtract_in_place(&self, name: &str, delta: &[f64]) -> Result<(), ModelError> {
        let mut inner = self.inner.write();
        check_shape(&inner.parameters, name, delta)?;
        if let Some(tensor) = inner.parameters.get_mut(name) { subtract(tensor, delta); }
        inner.version += 1;
        Ok(())
    }

    fn subtract_all(&self, deltas: &BTreeMap<String, Tensor>) -> Result<ModelVersion, ModelError> {
        let mut inner = self.inner.write();
        for (name, delta) in deltas { check_shape(&inner.parameters, name, delta)?; }
        for (name, delta) in deltas {
            if let Some(tensor) = inner.parameters.get_mut(name) { subtract(tensor, delta); }
        }
        inner.version += 1;
        Ok(inner.version)
    }

    fn version(&self) -> ModelVersion { self.inner.read().version }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> InMemoryModel {
        InMemoryModel::new(BTreeMap::from([("w".to_string(), vec![1.0, 1.0]), ("b".to_string(), vec![0.5])]))
    }

    #[test]
    fn subtract_all_is_all_or_nothing() {
        let m = model();
        let bad = BTreeMap::from([("w".to_string(), vec![0.5, 0.5]), ("b".to_string(), vec![1.0, 2.0])]);
        assert!(matches!(m.subtract_all(&bad), Err(ModelError::ShapeMismatch { .. })));
        assert_eq!(m.get("w"), Some(vec![1.0, 1.0]));
        assert_eq!(m.version(), 1);

        let good = BTreeMap::from([("w".to_string(), vec![0.5, 0.25]), ("b".to_string(), vec![0.5])]);
        assert_eq!(m.subtract_all(&good), Ok(2));
        assert_eq!(m.get("w"), Some(vec![0.5, 0.75]));
        assert_eq!(m.get("b"), Some(vec![0.0]));
    }

    #[test]
    fn subtract_single_parameter() {
        let m = model();
        m.subtract_in_place("b", &[0.25]).unwrap();
        assert_eq!(m.get("b"), Some(vec![0.25]));
        assert_eq!(m.subtract_in_place("x", &[1.0]), Err(ModelError::UnknownParameter("x".into())));
    }
}
