use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::SecureAggError;

/// Names every contribution must carry, fixed for the duration of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSchema {
    names: BTreeSet<String>,
}

impl ParameterSchema {
    pub fn new<I, S>(names: I) -> Result<Self, SecureAggError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() { return Err(SecureAggError::EmptySchema); }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize { self.names.len() }
    pub fn is_empty(&self) -> bool { self.names.is_empty() }
    pub fn contains(&self, name: &str) -> bool { self.names.contains(name) }
    pub fn names(&self) -> impl Iterator<Item = &str> { self.names.iter().map(String::as_str) }

    /// Set-equality check of `keys` against the schema.
    pub fn validate<'a, I>(&self, keys: I) -> Result<(), SecureAggError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let received: BTreeSet<&String> = keys.into_iter().collect();
        let missing: Vec<String> = self.names.iter().filter(|n| !received.contains(n)).cloned().collect();
        let unexpected: Vec<String> = received.iter().filter(|n| !self.names.contains(n.as_str())).map(|n| n.to_string()).collect();
        if missing.is_empty() && unexpected.is_empty() { return Ok(()); }
        Err(SecureAggError::SchemaMismatch { missing, unexpected })
    }
}
