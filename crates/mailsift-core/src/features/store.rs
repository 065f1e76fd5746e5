//! Per-transaction feature store

use mailsift_common::{Feature, FeatureValue};
use std::collections::HashMap;

/// Features of one transaction, unique by name
///
/// Insertion order is kept for logging; a later write to an existing name
/// replaces the value in place.
#[derive(Debug, Clone, Default)]
pub struct FeatureStore {
    features: Vec<Feature>,
    index: HashMap<String, usize>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a feature
    pub fn insert(&mut self, feature: Feature) {
        match self.index.get(&feature.name) {
            Some(&pos) => self.features[pos].value = feature.value,
            None => {
                self.index.insert(feature.name.clone(), self.features.len());
                self.features.push(feature);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.index.get(name).map(|&pos| &self.features[pos].value)
    }

    /// Exact lookup, falling back to a case-insensitive match
    pub fn find(&self, name: &str) -> Option<&FeatureValue> {
        self.get(name).or_else(|| {
            self.features
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(name))
                .map(|f| &f.value)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn clear(&mut self) {
        self.features.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// JSON array of the features, type tags included
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.features).unwrap_or(serde_json::Value::Null)
    }
}

impl Extend<Feature> for FeatureStore {
    fn extend<T: IntoIterator<Item = Feature>>(&mut self, iter: T) {
        for feature in iter {
            self.insert(feature);
        }
    }
}

impl FromIterator<Feature> for FeatureStore {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        let mut store = Self::new();
        store.extend(iter);
        store
    }
}
