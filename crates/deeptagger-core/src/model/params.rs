//! Named parameters of a tagger, backed by a candle [`VarMap`].
//!
//! Every tensor a layer holds shares storage with its variable here, so
//! [`ParameterStore::load`] updates built layers in place.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use candle_core::{DType, Device, Shape, Tensor, Var};
use candle_nn::{Init, VarBuilder, VarMap};
use tracing::debug;

use crate::error::{Result, TaggerError};

/// Glorot/Xavier uniform initializer for a weight with the given fans.
pub fn xavier_uniform(fan_in: usize, fan_out: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

pub struct ParameterStore {
    varmap: VarMap,
    frozen: BTreeSet<String>,
    device: Device,
}

impl ParameterStore {
    pub fn new(device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            frozen: BTreeSet::new(),
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn vars(&self) -> MutexGuard<'_, std::collections::HashMap<String, Var>> {
        lock(self.varmap.data())
    }

    /// Create `name` with `init`. Names are unique; a second registration
    /// is a configuration error.
    pub fn create<S: Into<Shape>>(&mut self, name: &str, shape: S, init: Init) -> Result<Tensor> {
        self.ensure_unregistered(name)?;
        let tensor = self
            .varmap
            .get(shape, name, init, DType::F32, &self.device)?;
        debug!(name, shape = ?tensor.dims(), "created parameter");
        Ok(tensor)
    }

    pub fn ensure_unregistered(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            return Err(TaggerError::InvalidConfig(format!(
                "parameter {name} is already registered"
            )));
        }
        Ok(())
    }

    /// Builder for candle layers that register their own variables here.
    /// Callers check names with [`ensure_unregistered`](Self::ensure_unregistered)
    /// first; the builder returns an existing variable of the same shape.
    pub fn var_builder(&self) -> VarBuilder<'_> {
        VarBuilder::from_varmap(&self.varmap, DType::F32, &self.device)
    }

    /// Create `name` holding a copy of `value`.
    pub fn create_from(&mut self, name: &str, value: &Tensor) -> Result<Tensor> {
        self.create(name, value.shape().clone(), Init::Const(0.0))?;
        self.set(name, value)?;
        self.get(name)
            .ok_or_else(|| TaggerError::InvalidConfig(format!("parameter {name} vanished")))
    }

    /// Overwrite an existing parameter; shapes must agree.
    pub fn set(&mut self, name: &str, value: &Tensor) -> Result<()> {
        let current = self
            .get(name)
            .ok_or_else(|| TaggerError::InvalidConfig(format!("unknown parameter {name}")))?;
        if current.dims() != value.dims() {
            return Err(TaggerError::ShapeMismatch(format!(
                "parameter {name} has shape {:?}, got {:?}",
                current.dims(),
                value.dims()
            )));
        }
        let value = value.to_dtype(DType::F32)?.to_device(&self.device)?;
        self.varmap.set_one(name, value)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Tensor> {
        self.vars().get(name).map(|var| var.as_tensor().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parameter names in lexical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars().keys().cloned().collect();
        names.sort();
        names
    }

    /// Keep `name` out of [`trainable_vars`](Self::trainable_vars).
    pub fn freeze(&mut self, name: &str) {
        self.frozen.insert(name.to_string());
    }

    pub fn is_frozen(&self, name: &str) -> bool {
        self.frozen.contains(name)
    }

    /// Variables an optimizer should update, ordered by name.
    pub fn trainable_vars(&self) -> Vec<Var> {
        let vars = self.vars();
        let mut named: Vec<(&String, &Var)> = vars
            .iter()
            .filter(|(name, _)| !self.frozen.contains(*name))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        named.into_iter().map(|(_, var)| var.clone()).collect()
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.varmap.save(path.as_ref())?;
        debug!(path = ?path.as_ref(), params = self.len(), "saved parameters");
        Ok(())
    }

    /// Load every registered parameter from a safetensors file. Tensors are
    /// placed on this store's device whatever device wrote them.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.varmap.load(path.as_ref())?;
        debug!(path = ?path.as_ref(), params = self.len(), "loaded parameters");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xavier_bound() {
        match xavier_uniform(4, 2) {
            Init::Uniform { lo, up } => {
                assert!((up - 1.0).abs() < 1e-12);
                assert!((lo + 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected init {other:?}"),
        }
    }

    #[test]
    fn test_create_and_duplicate() {
        let mut store = ParameterStore::new(&Device::Cpu);
        let t = store.create("linear.bias", 3, Init::Const(0.0)).unwrap();
        assert_eq!(t.to_vec1::<f32>().unwrap(), vec![0.0; 3]);
        assert!(matches!(
            store.create("linear.bias", 3, Init::Const(0.0)),
            Err(TaggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_set_updates_shared_tensor() {
        let mut store = ParameterStore::new(&Device::Cpu);
        let held = store.create("w", (2,), Init::Const(0.0)).unwrap();
        let value = Tensor::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        store.set("w", &value).unwrap();
        assert_eq!(held.to_vec1::<f32>().unwrap(), vec![1.0, 2.0]);

        let wrong = Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu).unwrap();
        assert!(matches!(
            store.set("w", &wrong),
            Err(TaggerError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_frozen_params_are_not_trainable() {
        let mut store = ParameterStore::new(&Device::Cpu);
        store.create("a", 2, Init::Const(1.0)).unwrap();
        store.create("b", 2, Init::Const(1.0)).unwrap();
        store.freeze("a");

        assert_eq!(store.trainable_vars().len(), 1);
        assert_eq!(store.all_vars().len(), 2);
        assert!(store.is_frozen("a"));
        assert_eq!(store.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "deeptagger-params-{}.safetensors",
            std::process::id()
        ));
        let mut store = ParameterStore::new(&Device::Cpu);
        store
            .create_from("w", &Tensor::new(&[3.0f32, 4.0], &Device::Cpu).unwrap())
            .unwrap();
        store.save(&path).unwrap();

        let mut other = ParameterStore::new(&Device::Cpu);
        let held = other.create("w", 2, Init::Const(0.0)).unwrap();
        other.load(&path).unwrap();
        assert_eq!(held.to_vec1::<f32>().unwrap(), vec![3.0, 4.0]);

        let _ = std::fs::remove_file(&path);
    }
}
