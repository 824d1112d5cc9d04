//! Argument buffer layout handed to the native invoke primitive
//!
//! ```text
//! +---------------------------+-----+--------------------------------+
//! | directory: 4 bytes/param  | pad | indirect region (8-aligned)    |
//! +---------------------------+-----+--------------------------------+
//! ```
//!
//! Direct parameters store their 32-bit value in the directory slot.
//! Indirect parameters store their value in the indirect region and the
//! directory slot holds the 32-bit offset of that value from the buffer start.

use super::converter::ConversionStep;
use smallvec::SmallVec;

pub const DIRECTORY_SLOT_SIZE: usize = 4;
pub const INDIRECT_ALIGN: usize = 8;
/// Slack added to every buffer on top of the worst-case layout
pub const BUFFER_PADDING: usize = 16;

#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// Scratch buffer holding one call's marshaled arguments
///
/// Reused across calls; `prepare` only reallocates when a larger layout is
/// needed than any seen before.
#[derive(Debug, Clone, Default)]
pub struct ArgBuffer {
    bytes: Vec<u8>,
    params: usize,
}

impl ArgBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(size: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(size),
            params: 0,
        }
    }

    /// Zero the buffer and size it for a call with `params` parameters
    pub fn prepare(&mut self, size: usize, params: usize) {
        self.bytes.clear();
        self.bytes.resize(size, 0);
        self.params = params;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    #[inline]
    pub fn param_count(&self) -> usize {
        self.params
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub(crate) fn write_i32(&mut self, offset: usize, value: i32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn write_i64(&mut self, offset: usize, value: i64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn write_f32(&mut self, offset: usize, value: f32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub(crate) fn write_f64(&mut self, offset: usize, value: f64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        self.bytes.get(offset..end)?.try_into().ok()
    }

    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        self.read(offset).map(i32::from_le_bytes)
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.read(offset).map(u32::from_le_bytes)
    }

    pub fn read_i64(&self, offset: usize) -> Option<i64> {
        self.read(offset).map(i64::from_le_bytes)
    }

    pub fn read_f32(&self, offset: usize) -> Option<f32> {
        self.read(offset).map(f32::from_le_bytes)
    }

    pub fn read_f64(&self, offset: usize) -> Option<f64> {
        self.read(offset).map(f64::from_le_bytes)
    }

    /// Raw 32-bit directory entry for parameter `index`
    pub fn directory_slot(&self, index: usize) -> Option<u32> {
        if index >= self.params {
            return None;
        }
        self.read_u32(index * DIRECTORY_SLOT_SIZE)
    }

    /// Offset of an indirect parameter's value, read from its directory slot
    pub fn indirect_offset(&self, index: usize) -> Option<usize> {
        self.directory_slot(index).map(|offset| offset as usize)
    }

    pub fn indirect_i32(&self, index: usize) -> Option<i32> {
        self.read_i32(self.indirect_offset(index)?)
    }

    pub fn indirect_u32(&self, index: usize) -> Option<u32> {
        self.read_u32(self.indirect_offset(index)?)
    }

    pub fn indirect_i64(&self, index: usize) -> Option<i64> {
        self.read_i64(self.indirect_offset(index)?)
    }

    pub fn indirect_f32(&self, index: usize) -> Option<f32> {
        self.read_f32(self.indirect_offset(index)?)
    }

    pub fn indirect_f64(&self, index: usize) -> Option<f64> {
        self.read_f64(self.indirect_offset(index)?)
    }
}

/// Where one parameter lands in the argument buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub directory: usize,
    /// Absolute offset of the value for indirect parameters
    pub indirect: Option<usize>,
    /// Root buffer slot for parameters that produce managed references
    pub root_slot: Option<usize>,
}

/// Precomputed layout for a converter, attached lazily on first call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStub {
    name: String,
    buffer_size: usize,
    indirect_base: usize,
    slots: SmallVec<[SlotLayout; 8]>,
}

impl CallStub {
    /// Lay out `steps` whose indirect sizes sum to `total_size`
    pub fn plan(name: String, steps: &[ConversionStep], total_size: usize) -> Self {
        let params = steps.len();
        let directory_size = params * DIRECTORY_SLOT_SIZE;
        let indirect_base = align_up(directory_size, INDIRECT_ALIGN);
        let buffer_size = total_size + directory_size + BUFFER_PADDING;

        let mut slots = SmallVec::with_capacity(params);
        let mut indirect_local = 0usize;
        let mut next_root = 0usize;

        for (i, step) in steps.iter().enumerate() {
            let indirect = if step.indirect.is_indirect() {
                let offset = indirect_base + indirect_local;
                indirect_local += align_up(step.size.max(step.indirect.value_size()), INDIRECT_ALIGN);
                Some(offset)
            } else {
                None
            };

            let root_slot = if step.needs_root {
                next_root += 1;
                Some(next_root - 1)
            } else {
                None
            };

            slots.push(SlotLayout {
                directory: i * DIRECTORY_SLOT_SIZE,
                indirect,
                root_slot,
            });
        }

        debug_assert!(indirect_base + indirect_local <= buffer_size);

        Self {
            name,
            buffer_size,
            indirect_base,
            slots,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn indirect_base(&self) -> usize {
        self.indirect_base
    }

    #[inline]
    pub fn slots(&self) -> &[SlotLayout] {
        &self.slots
    }
}
