use std::collections::{BTreeMap, btree_map};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// A dense, dynamically shaped tensor of `f32` values.
pub type Tensor = ArrayD<f32>;

/// An ordered collection of tensors indexed by the name of the parameter they belong to.
///
/// Both the trainable parameters of a model and the gradients computed for them are represented
/// with this type, the iteration order is always the lexicographic order of the names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamedTensors {
    tensors: BTreeMap<String, Tensor>,
}

/// The trainable parameters of a model, owned by the model and updated in place by an optimizer.
pub type ParameterSet = NamedTensors;

/// The gradients produced by a single training step, one entry per trainable parameter.
pub type Gradients = NamedTensors;

impl NamedTensors {
    /// Creates a new empty `NamedTensors`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor under `name`.
    ///
    /// # Arguments
    /// * `name` - The name of the parameter.
    /// * `tensor` - The tensor to store.
    ///
    /// # Returns
    /// The previous tensor stored under that name, if any.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    /// Builder flavoured `insert`.
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.tensors.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Returns the amount of named tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Returns the total amount of scalar values across all tensors.
    pub fn nparams(&self) -> usize {
        self.tensors.values().map(Tensor::len).sum()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Tensor> {
        self.tensors.iter()
    }

    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, Tensor> {
        self.tensors.iter_mut()
    }

    /// Creates a new collection with the same names and shapes, filled with zeros.
    pub fn zeros_like(&self) -> Self {
        self.tensors
            .iter()
            .map(|(name, t)| (name.clone(), Tensor::zeros(t.raw_dim())))
            .collect()
    }

    /// Sets every value of every tensor to `value`, keeping the allocations.
    pub fn fill(&mut self, value: f32) {
        self.tensors.values_mut().for_each(|t| t.fill(value));
    }

    /// Multiplies every value of every tensor by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.tensors
            .values_mut()
            .for_each(|t| t.mapv_inplace(|x| x * factor));
    }

    /// Gives mutable access to the inner map, mostly for parallel iteration.
    pub fn as_map_mut(&mut self) -> &mut BTreeMap<String, Tensor> {
        &mut self.tensors
    }
}

impl FromIterator<(String, Tensor)> for NamedTensors {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a NamedTensors {
    type Item = (&'a String, &'a Tensor);
    type IntoIter = btree_map::Iter<'a, String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

impl IntoIterator for NamedTensors {
    type Item = (String, Tensor);
    type IntoIter = btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}
