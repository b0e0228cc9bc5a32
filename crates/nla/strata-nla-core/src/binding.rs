//! Property accessor seam.
//!
//! The engine never touches host properties directly. Adapters implement
//! [`PropertyAccessor`] to resolve paths to opaque handles, describe the
//! property behind a handle, and read/write individual elements.
//! [`PropertyStore`] is an in-memory implementation used by tests, benches and
//! fixture-driven tooling.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Opaque handle issued by a [`PropertyAccessor`]. Equality and hashing are by value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PropertyHandle(pub u64);

/// Declared semantic subtype of an array property.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySubtype {
    #[default]
    None,
    Quaternion,
    AxisAngle,
}

/// Shape and flags of a resolved property.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    /// Number of float elements (1 for scalars).
    pub len: usize,
    pub is_array: bool,
    pub animatable: bool,
    #[serde(default)]
    pub subtype: PropertySubtype,
    /// Scale-like property where 1.0 is the neutral value.
    #[serde(default)]
    pub proportional: bool,
}

impl PropertyInfo {
    pub fn scalar() -> Self {
        Self {
            len: 1,
            is_array: false,
            animatable: true,
            subtype: PropertySubtype::None,
            proportional: false,
        }
    }

    pub fn array(len: usize) -> Self {
        Self {
            len,
            is_array: true,
            ..Self::scalar()
        }
    }

    pub fn quaternion() -> Self {
        Self {
            subtype: PropertySubtype::Quaternion,
            ..Self::array(4)
        }
    }

    pub fn axis_angle() -> Self {
        Self {
            subtype: PropertySubtype::AxisAngle,
            ..Self::array(4)
        }
    }

    pub fn proportional(mut self) -> Self {
        self.proportional = true;
        self
    }

    pub fn locked(mut self) -> Self {
        self.animatable = false;
        self
    }
}

/// Adapters implement this to expose host properties to the engine.
pub trait PropertyAccessor {
    /// Resolve a property path. `None` when the path names nothing.
    fn resolve(&self, path: &str) -> Option<PropertyHandle>;

    fn info(&self, handle: PropertyHandle) -> Option<PropertyInfo>;

    /// Fill `out` (sized to `info.len`) with the property's default values.
    fn default_values(&self, handle: PropertyHandle, out: &mut [f32]);

    fn read(&self, handle: PropertyHandle, index: usize) -> Option<f32>;

    /// Returns false when the element could not be written.
    fn write(&mut self, handle: PropertyHandle, index: usize, value: f32) -> bool;
}

#[derive(Clone, Debug)]
struct StoredProperty {
    path: String,
    info: PropertyInfo,
    defaults: Vec<f32>,
    values: Vec<f32>,
}

/// In-memory property table keyed by path.
#[derive(Clone, Debug, Default)]
pub struct PropertyStore {
    by_path: HashMap<String, PropertyHandle>,
    props: Vec<StoredProperty>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property; current values start at the defaults. Re-registering a path
    /// replaces its description and keeps the handle.
    pub fn insert(&mut self, path: &str, info: PropertyInfo, defaults: &[f32]) -> PropertyHandle {
        let mut defaults_vec = vec![0.0; info.len];
        for (dst, src) in defaults_vec.iter_mut().zip(defaults.iter()) {
            *dst = *src;
        }
        let stored = StoredProperty {
            path: path.to_string(),
            info,
            values: defaults_vec.clone(),
            defaults: defaults_vec,
        };
        if let Some(handle) = self.by_path.get(path).copied() {
            self.props[handle.0 as usize] = stored;
            return handle;
        }
        let handle = PropertyHandle(self.props.len() as u64);
        self.props.push(stored);
        self.by_path.insert(path.to_string(), handle);
        handle
    }

    pub fn insert_scalar(&mut self, path: &str, default: f32) -> PropertyHandle {
        self.insert(path, PropertyInfo::scalar(), &[default])
    }

    pub fn handle(&self, path: &str) -> Option<PropertyHandle> {
        self.by_path.get(path).copied()
    }

    /// Current values of the property at `path`.
    pub fn values(&self, path: &str) -> Option<&[f32]> {
        let handle = self.handle(path)?;
        self.props.get(handle.0 as usize).map(|p| p.values.as_slice())
    }

    /// First element of the property at `path`.
    pub fn scalar(&self, path: &str) -> Option<f32> {
        self.values(path).and_then(|v| v.first().copied())
    }

    pub fn set_values(&mut self, path: &str, values: &[f32]) -> bool {
        let Some(handle) = self.handle(path) else {
            return false;
        };
        let prop = &mut self.props[handle.0 as usize];
        for (dst, src) in prop.values.iter_mut().zip(values.iter()) {
            *dst = *src;
        }
        true
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.props.iter().map(|p| p.path.as_str())
    }

    fn get(&self, handle: PropertyHandle) -> Option<&StoredProperty> {
        self.props.get(handle.0 as usize)
    }
}

impl PropertyAccessor for PropertyStore {
    fn resolve(&self, path: &str) -> Option<PropertyHandle> {
        self.handle(path)
    }

    fn info(&self, handle: PropertyHandle) -> Option<PropertyInfo> {
        self.get(handle).map(|p| p.info)
    }

    fn default_values(&self, handle: PropertyHandle, out: &mut [f32]) {
        if let Some(p) = self.get(handle) {
            for (dst, src) in out.iter_mut().zip(p.defaults.iter()) {
                *dst = *src;
            }
        }
    }

    fn read(&self, handle: PropertyHandle, index: usize) -> Option<f32> {
        self.get(handle).and_then(|p| p.values.get(index).copied())
    }

    fn write(&mut self, handle: PropertyHandle, index: usize, value: f32) -> bool {
        match self
            .props
            .get_mut(handle.0 as usize)
            .and_then(|p| p.values.get_mut(index))
        {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_resolves_and_writes() {
        let mut store = PropertyStore::new();
        let h = store.insert("obj/location", PropertyInfo::array(3), &[1.0, 2.0, 3.0]);
        assert_eq!(store.resolve("obj/location"), Some(h));
        assert_eq!(store.resolve("obj/missing"), None);
        assert!(store.write(h, 1, 9.0));
        assert!(!store.write(h, 3, 9.0));
        assert_eq!(store.values("obj/location"), Some(&[1.0, 9.0, 3.0][..]));

        let mut defaults = [0.0; 3];
        store.default_values(h, &mut defaults);
        assert_eq!(defaults, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn reinsert_keeps_handle() {
        let mut store = PropertyStore::new();
        let a = store.insert_scalar("x", 0.0);
        let b = store.insert_scalar("x", 4.0);
        assert_eq!(a, b);
        assert_eq!(store.scalar("x"), Some(4.0));
    }
}
