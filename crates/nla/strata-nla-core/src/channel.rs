//! Channel registry.
//!
//! A channel is one resolved animatable property for the lifetime of an
//! evaluation session. Channels are created lazily on first reference, keep a
//! stable dense [`ChannelId`], and own the base (default) values every snapshot
//! chain falls back to.

use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::binding::{PropertyAccessor, PropertyHandle, PropertyInfo, PropertySubtype};
use crate::ids::ChannelId;
use crate::mask::ValidMask;
use crate::snapshot::ChannelSnapshot;

/// Value topology of a channel; selects the Combine formula.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MixMode {
    Add,
    Multiply,
    AxisAngle,
    Quaternion,
}

impl MixMode {
    fn detect(info: &PropertyInfo) -> Self {
        match info.subtype {
            PropertySubtype::Quaternion if info.len == 4 => MixMode::Quaternion,
            PropertySubtype::AxisAngle if info.len == 4 => MixMode::AxisAngle,
            _ if info.proportional => MixMode::Multiply,
            _ => MixMode::Add,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Channel {
    pub id: ChannelId,
    pub handle: PropertyHandle,
    /// First path this channel was resolved through, if any.
    pub path: Option<String>,
    pub is_array: bool,
    pub mix_mode: MixMode,
    /// Default values with cleared masks; the root of every snapshot fallback chain.
    /// Quaternions are stored (w, x, y, z).
    pub base: ChannelSnapshot,
    /// Elements some reachable clip could write; flushed after evaluation.
    pub domain: ValidMask,
}

impl Channel {
    #[inline]
    pub fn len(&self) -> usize {
        self.base.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.base.values.is_empty()
    }

    #[inline]
    pub fn defaults(&self) -> &[f32] {
        &self.base.values
    }

    /// Map a curve array index onto an element index. Non-array channels accept any
    /// index as element 0.
    pub fn validate_index(&self, array_index: usize) -> Option<usize> {
        if !self.is_array {
            return Some(0);
        }
        if array_index < self.len() {
            Some(array_index)
        } else {
            debug!(
                "invalid array index {} for '{}' (length {})",
                array_index,
                self.path.as_deref().unwrap_or("<handle>"),
                self.len()
            );
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    by_handle: HashMap<PropertyHandle, ChannelId>,
    /// Failed lookups are cached as `None`.
    by_path: HashMap<String, Option<ChannelId>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[inline]
    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id.index()]
    }

    #[inline]
    pub fn channel_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.index()]
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = ChannelId> {
        (0..self.channels.len() as u32).map(ChannelId)
    }

    /// Channel for a property path. Unresolvable or non-animatable paths yield `None`
    /// and are remembered as such for the rest of the session.
    pub fn resolve_path(
        &mut self,
        accessor: &dyn PropertyAccessor,
        path: &str,
    ) -> Option<ChannelId> {
        if let Some(cached) = self.by_path.get(path) {
            return *cached;
        }
        self.by_path.insert(path.to_string(), None);

        let Some(handle) = accessor.resolve(path) else {
            debug!("invalid property path '{}'", path);
            return None;
        };
        let info = accessor.info(handle)?;
        if !info.animatable {
            debug!("property '{}' is not animatable", path);
            return None;
        }

        let id = self.resolve_with_info(accessor, handle, info);
        let channel = &mut self.channels[id.index()];
        if channel.path.is_none() {
            channel.path = Some(path.to_string());
        }
        self.by_path.insert(path.to_string(), Some(id));
        Some(id)
    }

    /// Channel for an already resolved property handle.
    pub fn resolve_handle(
        &mut self,
        accessor: &dyn PropertyAccessor,
        handle: PropertyHandle,
    ) -> Option<ChannelId> {
        if let Some(id) = self.by_handle.get(&handle) {
            return Some(*id);
        }
        // Keying resolves handles directly; the animatable check applies to path lookups only.
        let info = accessor.info(handle)?;
        Some(self.resolve_with_info(accessor, handle, info))
    }

    fn resolve_with_info(
        &mut self,
        accessor: &dyn PropertyAccessor,
        handle: PropertyHandle,
        info: PropertyInfo,
    ) -> ChannelId {
        if let Some(id) = self.by_handle.get(&handle) {
            return *id;
        }

        let len = if info.is_array { info.len.max(1) } else { 1 };
        let mix_mode = MixMode::detect(&PropertyInfo { len, ..info });
        let defaults = default_values(accessor, handle, len, mix_mode);

        let id = ChannelId(self.channels.len() as u32);
        self.channels.push(Channel {
            id,
            handle,
            path: None,
            is_array: info.is_array,
            mix_mode,
            base: ChannelSnapshot::from_values(id, defaults),
            domain: ValidMask::new(len),
        });
        self.by_handle.insert(handle, id);
        id
    }
}

fn default_values(
    accessor: &dyn PropertyAccessor,
    handle: PropertyHandle,
    len: usize,
    mix_mode: MixMode,
) -> Vec<f32> {
    match mix_mode {
        MixMode::Quaternion => vec![1.0, 0.0, 0.0, 0.0],
        MixMode::AxisAngle => vec![0.0; 4],
        MixMode::Add | MixMode::Multiply => {
            let mut values = vec![0.0; len];
            accessor.default_values(handle, &mut values);
            if mix_mode == MixMode::Multiply {
                for v in values.iter_mut() {
                    if *v == 0.0 {
                        *v = 1.0;
                    }
                }
            }
            values
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::PropertyStore;

    fn store() -> PropertyStore {
        let mut s = PropertyStore::new();
        s.insert("loc", PropertyInfo::array(3), &[1.0, 2.0, 3.0]);
        s.insert("rot", PropertyInfo::quaternion(), &[0.0, 0.0, 0.0, 0.0]);
        s.insert("aa", PropertyInfo::axis_angle(), &[5.0, 5.0, 5.0, 5.0]);
        s.insert("scale", PropertyInfo::array(3).proportional(), &[0.0, 2.0, 0.0]);
        s.insert("locked", PropertyInfo::scalar().locked(), &[0.0]);
        s
    }

    #[test]
    fn resolves_idempotently() {
        let s = store();
        let mut reg = ChannelRegistry::new();
        let a = reg.resolve_path(&s, "loc").unwrap();
        let b = reg.resolve_path(&s, "loc").unwrap();
        assert_eq!(a, b);
        let via_handle = reg.resolve_handle(&s, s.handle("loc").unwrap()).unwrap();
        assert_eq!(a, via_handle);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn detects_mix_modes_and_defaults() {
        let s = store();
        let mut reg = ChannelRegistry::new();
        let loc = reg.resolve_path(&s, "loc").unwrap();
        let rot = reg.resolve_path(&s, "rot").unwrap();
        let aa = reg.resolve_path(&s, "aa").unwrap();
        let scale = reg.resolve_path(&s, "scale").unwrap();

        assert_eq!(reg.channel(loc).mix_mode, MixMode::Add);
        assert_eq!(reg.channel(loc).defaults(), &[1.0, 2.0, 3.0][..]);
        assert_eq!(reg.channel(rot).mix_mode, MixMode::Quaternion);
        assert_eq!(reg.channel(rot).defaults(), &[1.0, 0.0, 0.0, 0.0][..]);
        assert_eq!(reg.channel(aa).mix_mode, MixMode::AxisAngle);
        assert_eq!(reg.channel(aa).defaults(), &[0.0; 4][..]);
        assert_eq!(reg.channel(scale).mix_mode, MixMode::Multiply);
        assert_eq!(reg.channel(scale).defaults(), &[1.0, 2.0, 1.0][..]);
    }

    #[test]
    fn rejects_missing_and_locked() {
        let s = store();
        let mut reg = ChannelRegistry::new();
        assert!(reg.resolve_path(&s, "nope").is_none());
        assert!(reg.resolve_path(&s, "locked").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn validates_indices() {
        let mut s = store();
        s.insert_scalar("influence", 0.5);
        let mut reg = ChannelRegistry::new();
        let loc = reg.resolve_path(&s, "loc").unwrap();
        let inf = reg.resolve_path(&s, "influence").unwrap();
        assert_eq!(reg.channel(loc).validate_index(2), Some(2));
        assert_eq!(reg.channel(loc).validate_index(3), None);
        assert_eq!(reg.channel(inf).validate_index(7), Some(0));
    }
}
