//! Identifiers and simple allocators for core entities.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClipId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StackId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct StripId(pub u32);

impl StripId {
    /// Synthetic strip standing in for a stack's non-pushed action.
    pub const ACTION: StripId = StripId(u32::MAX);
}

/// Dense per-session channel index. Only meaningful inside the registry that issued it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChannelId(pub u32);

impl ChannelId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Monotonic allocator for ClipId, StackId and StripId.
#[derive(Default, Debug)]
pub struct IdAllocator {
    next_clip: u32,
    next_stack: u32,
    next_strip: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn alloc_clip(&mut self) -> ClipId {
        let id = ClipId(self.next_clip);
        self.next_clip = self.next_clip.wrapping_add(1);
        id
    }

    #[inline]
    pub fn alloc_stack(&mut self) -> StackId {
        let id = StackId(self.next_stack);
        self.next_stack = self.next_stack.wrapping_add(1);
        id
    }

    /// Strip ids never collide with [`StripId::ACTION`].
    #[inline]
    pub fn alloc_strip(&mut self) -> StripId {
        if self.next_strip == StripId::ACTION.0 {
            self.next_strip = 0;
        }
        let id = StripId(self.next_strip);
        self.next_strip = self.next_strip.wrapping_add(1);
        id
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_monotonic() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_clip(), ClipId(0));
        assert_eq!(alloc.alloc_clip(), ClipId(1));
        assert_eq!(alloc.alloc_stack(), StackId(0));
        assert_eq!(alloc.alloc_strip(), StripId(0));
        assert_eq!(alloc.alloc_strip(), StripId(1));
        alloc.reset();
        assert_eq!(alloc.alloc_strip(), StripId(0));
    }

    #[test]
    fn strip_ids_skip_action_sentinel() {
        let mut alloc = IdAllocator::new();
        alloc.next_strip = StripId::ACTION.0;
        assert_eq!(alloc.alloc_strip(), StripId(0));
    }
}
