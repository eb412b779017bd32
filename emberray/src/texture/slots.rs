//! Per-type slot tables and the flat handle encoding.
//!
//! Shaders index into one texture array per pixel kind, so records live in
//! one vector per kind and a handle fuses (kind, slot) into a single
//! integer: the low bits carry the kind tag, the high bits the slot. The
//! encoding is stable for the lifetime of a record.

use super::ImageRecord;
use crate::pixel::PixelKind;
use crate::texture::ImageIdentity;

/// Bits reserved for the pixel-kind tag in a flat handle.
pub const IMAGE_DATA_TYPE_SHIFT: u32 = 3;

/// Mask selecting the pixel-kind tag.
pub const IMAGE_DATA_TYPE_MASK: i32 = (1 << IMAGE_DATA_TYPE_SHIFT) - 1;

/// Hard cap on live records across all kinds.
pub const TEX_NUM_MAX: usize = 1024;

/// Opaque flat texture handle; what shader nodes store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(i32);

impl TextureHandle {
    pub const INVALID: TextureHandle = TextureHandle(-1);

    pub fn encode(kind: PixelKind, slot: usize) -> TextureHandle {
        TextureHandle(((slot as i32) << IMAGE_DATA_TYPE_SHIFT) | kind.tag() as i32)
    }

    /// Split back into (kind, slot); `None` for the invalid handle.
    pub fn decode(self) -> Option<(PixelKind, usize)> {
        if self.0 < 0 {
            return None;
        }
        let kind = PixelKind::from_tag((self.0 & IMAGE_DATA_TYPE_MASK) as u32)?;
        Some((kind, (self.0 >> IMAGE_DATA_TYPE_SHIFT) as usize))
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// The raw integer crossing the host/device boundary.
    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn from_raw(raw: i32) -> TextureHandle {
        TextureHandle(raw)
    }
}

/// One record vector per pixel kind. Empty slots are reused in place;
/// vectors only grow while no empty slot exists.
pub(crate) struct SlotTable {
    slots: [Vec<Option<Box<ImageRecord>>>; PixelKind::COUNT],
    counts: [usize; PixelKind::COUNT],
}

impl SlotTable {
    pub fn new() -> SlotTable {
        SlotTable {
            slots: Default::default(),
            counts: [0; PixelKind::COUNT],
        }
    }

    pub fn get(&self, kind: PixelKind, slot: usize) -> Option<&ImageRecord> {
        self.slots[kind.tag() as usize]
            .get(slot)
            .and_then(|s| s.as_deref())
    }

    pub fn get_mut(&mut self, kind: PixelKind, slot: usize) -> Option<&mut ImageRecord> {
        self.slots[kind.tag() as usize]
            .get_mut(slot)
            .and_then(|s| s.as_deref_mut())
    }

    /// First empty slot, or the vector length when none is free.
    pub fn free_slot(&self, kind: PixelKind) -> usize {
        let vec = &self.slots[kind.tag() as usize];
        vec.iter()
            .position(Option::is_none)
            .unwrap_or(vec.len())
    }

    /// Place a record; `slot` is either an empty slot or the append
    /// position returned by [`SlotTable::free_slot`].
    pub fn insert(&mut self, kind: PixelKind, slot: usize, record: Box<ImageRecord>) {
        let vec = &mut self.slots[kind.tag() as usize];
        if slot == vec.len() {
            vec.push(Some(record));
        } else {
            debug_assert!(vec[slot].is_none());
            vec[slot] = Some(record);
        }
        self.counts[kind.tag() as usize] += 1;
    }

    pub fn remove(&mut self, kind: PixelKind, slot: usize) -> Option<Box<ImageRecord>> {
        let record = self.slots[kind.tag() as usize].get_mut(slot)?.take();
        if record.is_some() {
            self.counts[kind.tag() as usize] -= 1;
        }
        record
    }

    /// Slot of the record matching `identity` within one kind.
    pub fn find_identity_in(&self, kind: PixelKind, identity: &ImageIdentity) -> Option<usize> {
        self.slots[kind.tag() as usize]
            .iter()
            .position(|s| s.as_deref().is_some_and(|r| &r.identity == identity))
    }

    /// Handle of the record matching `identity`, scanning every kind.
    pub fn find_identity(&self, identity: &ImageIdentity) -> Option<TextureHandle> {
        for kind in PixelKind::ALL {
            if let Some(slot) = self.find_identity_in(kind, identity) {
                return Some(TextureHandle::encode(kind, slot));
            }
        }
        None
    }

    /// Live records across all kinds, for the `TEX_NUM_MAX` cap.
    pub fn total_records(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn len(&self, kind: PixelKind) -> usize {
        self.slots[kind.tag() as usize].len()
    }

    /// Iterate occupied slots.
    pub fn records(&self) -> impl Iterator<Item = (PixelKind, usize, &ImageRecord)> {
        self.slots.iter().enumerate().flat_map(|(tag, vec)| {
            let kind = PixelKind::ALL[tag];
            vec.iter()
                .enumerate()
                .filter_map(move |(slot, s)| s.as_deref().map(|r| (kind, slot, r)))
        })
    }

    /// Iterate occupied slots mutably; loader tasks borrow records through
    /// this during device updates.
    pub fn records_mut(&mut self) -> impl Iterator<Item = (PixelKind, usize, &mut ImageRecord)> {
        self.slots.iter_mut().enumerate().flat_map(|(tag, vec)| {
            let kind = PixelKind::ALL[tag];
            vec.iter_mut()
                .enumerate()
                .filter_map(move |(slot, s)| s.as_deref_mut().map(|r| (kind, slot, r)))
        })
    }
}
