//! Layered sparse snapshots of channel values.
//!
//! A [`Snapshot`] holds channel values it has written itself and falls back to
//! its parent (and finally the channel's base values) for everything else.
//! Writes always go through [`Snapshot::ensure`], which copies values (never
//! masks) from the nearest ancestor on first touch, so ancestors are never
//! mutated through a child.

use crate::channel::ChannelRegistry;
use crate::config::Config;
use crate::ids::ChannelId;
use crate::mask::ValidMask;

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSnapshot {
    pub channel: ChannelId,
    pub values: Vec<f32>,
    /// Elements the producing strip actually supplied.
    pub blend_domain: ValidMask,
    /// Elements usable in an inverse solve.
    pub remap_domain: ValidMask,
}

impl ChannelSnapshot {
    /// Values with both masks cleared.
    pub fn from_values(channel: ChannelId, values: Vec<f32>) -> Self {
        let len = values.len();
        Self {
            channel,
            values,
            blend_domain: ValidMask::new(len),
            remap_domain: ValidMask::new(len),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Snapshot<'p> {
    channels: Vec<Option<ChannelSnapshot>>,
    parent: Option<&'p Snapshot<'p>>,
}

impl<'p> Snapshot<'p> {
    /// Root snapshot; falls back directly to channel defaults.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Vec::with_capacity(capacity),
            parent: None,
        }
    }

    pub fn with_parent(parent: &'p Snapshot<'p>, capacity: usize) -> Self {
        Self {
            channels: Vec::with_capacity(capacity),
            parent: Some(parent),
        }
    }

    /// Root snapshot sized from the engine configuration and current channel count.
    pub fn for_registry(config: &Config, registry: &ChannelRegistry) -> Self {
        Self::new(config.snapshot_capacity.max(registry.len()))
    }

    #[inline]
    pub fn parent(&self) -> Option<&'p Snapshot<'p>> {
        self.parent
    }

    /// Local lookup only.
    #[inline]
    pub fn get(&self, id: ChannelId) -> Option<&ChannelSnapshot> {
        self.channels.get(id.index()).and_then(|c| c.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut ChannelSnapshot> {
        self.channels.get_mut(id.index()).and_then(|c| c.as_mut())
    }

    /// Walk the parent chain; terminates at the channel's base values.
    pub fn find<'a>(&'a self, registry: &'a ChannelRegistry, id: ChannelId) -> &'a ChannelSnapshot {
        let mut current: Option<&'a Snapshot<'a>> = Some(self);
        while let Some(snapshot) = current {
            if let Some(cs) = snapshot.get(id) {
                return cs;
            }
            current = snapshot.parent;
        }
        &registry.channel(id).base
    }

    /// Local entry, created from the parent chain's values on first touch.
    pub fn ensure(&mut self, registry: &ChannelRegistry, id: ChannelId) -> &mut ChannelSnapshot {
        let idx = id.index();
        if idx >= self.channels.len() {
            self.channels.resize_with(idx + 1, || None);
        }
        let parent = self.parent;
        self.channels[idx].get_or_insert_with(|| {
            let values = match parent {
                Some(parent) => parent.find(registry, id).values.clone(),
                None => registry.channel(id).base.values.clone(),
            };
            ChannelSnapshot::from_values(id, values)
        })
    }

    /// Insert or replace a local entry.
    pub fn insert(&mut self, cs: ChannelSnapshot) {
        let idx = cs.channel.index();
        if idx >= self.channels.len() {
            self.channels.resize_with(idx + 1, || None);
        }
        self.channels[idx] = Some(cs);
    }

    /// Give every registered channel a local entry.
    pub fn ensure_all_channels(&mut self, registry: &ChannelRegistry) {
        for id in registry.ids() {
            self.ensure(registry, id);
        }
    }

    /// Mark every element of every local entry as supplied.
    pub fn enable_all_blend_domain(&mut self) {
        for cs in self.channels.iter_mut().flatten() {
            cs.blend_domain.set_all(true);
        }
    }

    /// Copy the values of every entry local to `other` into this snapshot.
    pub fn absorb_values(&mut self, registry: &ChannelRegistry, other: &Snapshot<'_>) {
        for cs in other.iter() {
            let dst = self.ensure(registry, cs.channel);
            dst.values.copy_from_slice(&cs.values);
        }
    }

    /// Local entries in channel order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelSnapshot> {
        self.channels.iter().flatten()
    }

    pub fn local_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.iter().map(|cs| cs.channel)
    }

    pub fn local_len(&self) -> usize {
        self.iter().count()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

/// A channel registry plus the snapshot evaluation accumulates into.
#[derive(Debug, Default)]
pub struct EvalData {
    pub registry: ChannelRegistry,
    pub snapshot: Snapshot<'static>,
}

impl EvalData {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: ChannelRegistry::new(),
            snapshot: Snapshot::new(config.snapshot_capacity),
        }
    }

    /// Current value of one element, falling back to defaults.
    pub fn value(&self, id: ChannelId, index: usize) -> Option<f32> {
        self.snapshot
            .find(&self.registry, id)
            .values
            .get(index)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{PropertyInfo, PropertyStore};

    fn setup() -> (PropertyStore, ChannelRegistry, ChannelId, ChannelId) {
        let mut store = PropertyStore::new();
        store.insert("a", PropertyInfo::array(2), &[1.0, 2.0]);
        store.insert_scalar("b", 7.0);
        let mut reg = ChannelRegistry::new();
        let a = reg.resolve_path(&store, "a").unwrap();
        let b = reg.resolve_path(&store, "b").unwrap();
        (store, reg, a, b)
    }

    #[test]
    fn find_falls_back_to_base() {
        let (_, reg, a, _) = setup();
        let root = Snapshot::new(4);
        assert!(root.get(a).is_none());
        assert_eq!(root.find(&reg, a).values, vec![1.0, 2.0]);
    }

    #[test]
    fn ensure_copies_values_not_masks_from_parent() {
        let (_, reg, a, _) = setup();
        let mut root = Snapshot::new(4);
        {
            let cs = root.ensure(&reg, a);
            cs.values[0] = 5.0;
            cs.blend_domain.enable(0);
        }
        let mut child = Snapshot::with_parent(&root, 4);
        assert_eq!(child.find(&reg, a).values, vec![5.0, 2.0]);
        let cs = child.ensure(&reg, a);
        assert_eq!(cs.values, vec![5.0, 2.0]);
        assert!(!cs.blend_domain.any());
        cs.values[1] = 9.0;
        drop(child);
        assert_eq!(root.get(a).unwrap().values, vec![5.0, 2.0]);
    }

    #[test]
    fn ensure_all_and_enable_all() {
        let (_, reg, a, b) = setup();
        let mut s = Snapshot::new(0);
        s.ensure_all_channels(&reg);
        s.enable_all_blend_domain();
        assert_eq!(s.local_len(), 2);
        assert!(s.get(a).unwrap().blend_domain.all());
        assert_eq!(s.get(b).unwrap().values, vec![7.0]);
    }

    #[test]
    fn absorb_copies_values() {
        let (_, reg, a, _) = setup();
        let mut dst = Snapshot::new(0);
        let mut src = Snapshot::new(0);
        src.ensure(&reg, a).values.copy_from_slice(&[3.0, 4.0]);
        dst.absorb_values(&reg, &src);
        assert_eq!(dst.get(a).unwrap().values, vec![3.0, 4.0]);
    }
}
