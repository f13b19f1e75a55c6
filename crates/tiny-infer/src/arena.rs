//! Bump allocation over a caller-provided byte buffer.
//!
//! The arena is the only memory the interpreter works in once a model is
//! loaded. Tensor data is carved from the head and grows upward; records that
//! live as long as the interpreter (tensor and node bookkeeping, kernel op
//! data) are carved from the tail and grow downward. Nothing is freed
//! individually, [`Arena::reset`] releases everything at once.
//!
//! Allocations are addressed by [`ArenaSlot`] offsets rather than references,
//! so they can be stored inside other records and resolved later.

use bytemuck::{Pod, PodCastError, Zeroable};
use core::mem::{align_of, size_of};
use core::ops::Range;

/// Errors raised by arena allocation and access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    /// Not enough free space between the head and the tail.
    #[error("arena out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested, excluding alignment padding.
        requested: usize,
        /// Bytes left between the two cursors.
        available: usize,
    },
    /// The slot does not lie inside the arena.
    #[error("arena slot {offset}..{end} is out of bounds")]
    InvalidSlot {
        /// Slot start.
        offset: usize,
        /// Slot end.
        end: usize,
    },
    /// A read overlaps the slot currently borrowed for writing.
    #[error("arena slot overlaps the region being written")]
    Overlap,
    /// A slot could not be viewed as the requested record type.
    #[error("arena slot cannot be viewed as a record: {0:?}")]
    Cast(PodCastError),
}

/// Location of an allocation inside an [`Arena`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ArenaSlot {
    offset: u32,
    len: u32,
}

impl ArenaSlot {
    /// Offset from the start of the arena.
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the slot holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn range(&self) -> Range<usize> {
        self.offset()..self.offset() + self.len()
    }
}

/// Bump allocator with a head and a tail cursor.
pub struct Arena<'a> {
    buffer: &'a mut [u8],
    head: usize,
    tail: usize,
}

impl<'a> Arena<'a> {
    /// Wrap `buffer`. The whole buffer is free.
    ///
    /// Buffers larger than 4 GiB are clamped, since slots store 32-bit offsets.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let len = buffer.len().min(u32::MAX as usize);
        let buffer = &mut buffer[..len];
        Self {
            tail: buffer.len(),
            buffer,
            head: 0,
        }
    }

    /// Total size of the buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes taken by both cursors, alignment padding included.
    pub fn used_bytes(&self) -> usize {
        self.head + (self.buffer.len() - self.tail)
    }

    /// Bytes left between the head and the tail.
    pub fn available(&self) -> usize {
        self.tail - self.head
    }

    /// Release every allocation.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = self.buffer.len();
    }

    fn base(&self) -> usize {
        self.buffer.as_ptr() as usize
    }

    fn out_of_memory(&self, requested: usize) -> ArenaError {
        ArenaError::OutOfMemory {
            requested,
            available: self.available(),
        }
    }

    /// Allocate `len` bytes at the head, with the returned memory's address
    /// aligned to `align` (a power of two).
    pub fn allocate_head(&mut self, len: usize, align: usize) -> Result<ArenaSlot, ArenaError> {
        let base = self.base();
        let start = (base + self.head).next_multiple_of(align) - base;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.tail)
            .ok_or_else(|| self.out_of_memory(len))?;

        self.head = end;
        self.buffer[start..end].fill(0);
        log::trace!("arena head: {len} bytes at {start}");

        Ok(slot(start, len))
    }

    /// Allocate `len` bytes at the tail, with the returned memory's address
    /// aligned to `align` (a power of two).
    pub fn allocate_tail(&mut self, len: usize, align: usize) -> Result<ArenaSlot, ArenaError> {
        let base = self.base();
        let start = (base + self.tail)
            .checked_sub(len)
            .map(|addr| addr & !(align - 1))
            .filter(|&addr| addr >= base + self.head)
            .ok_or_else(|| self.out_of_memory(len))?
            - base;

        self.tail = start;
        self.buffer[start..start + len].fill(0);
        log::trace!("arena tail: {len} bytes at {start}");

        Ok(slot(start, len))
    }

    /// Allocate a zeroed record of type `T` at the tail.
    pub fn allocate_record<T: Pod>(&mut self, value: T) -> Result<ArenaSlot, ArenaError> {
        let slot = self.allocate_tail(size_of::<T>(), align_of::<T>())?;
        self.get_mut(slot)?.copy_from_slice(bytemuck::bytes_of(&value));
        Ok(slot)
    }

    /// Allocate a zeroed array of `count` records of type `T` at the tail.
    pub fn allocate_slice<T: Pod>(&mut self, count: usize) -> Result<ArenaSlot, ArenaError> {
        let len = size_of::<T>()
            .checked_mul(count)
            .ok_or_else(|| self.out_of_memory(usize::MAX))?;
        self.allocate_tail(len, align_of::<T>())
    }

    /// The bytes of a slot.
    pub fn get(&self, slot: ArenaSlot) -> Result<&[u8], ArenaError> {
        self.buffer.get(slot.range()).ok_or(invalid(slot))
    }

    /// The bytes of a slot, mutably.
    pub fn get_mut(&mut self, slot: ArenaSlot) -> Result<&mut [u8], ArenaError> {
        self.buffer.get_mut(slot.range()).ok_or(invalid(slot))
    }

    /// A record previously stored with [`Arena::allocate_record`].
    pub fn record<T: Pod>(&self, slot: ArenaSlot) -> Result<&T, ArenaError> {
        bytemuck::try_from_bytes(self.get(slot)?).map_err(ArenaError::Cast)
    }

    /// A record previously stored with [`Arena::allocate_record`], mutably.
    pub fn record_mut<T: Pod>(&mut self, slot: ArenaSlot) -> Result<&mut T, ArenaError> {
        bytemuck::try_from_bytes_mut(self.get_mut(slot)?).map_err(ArenaError::Cast)
    }

    /// An array previously allocated with [`Arena::allocate_slice`].
    pub fn slice<T: Pod>(&self, slot: ArenaSlot) -> Result<&[T], ArenaError> {
        bytemuck::try_cast_slice(self.get(slot)?).map_err(ArenaError::Cast)
    }

    /// An array previously allocated with [`Arena::allocate_slice`], mutably.
    pub fn slice_mut<T: Pod>(&mut self, slot: ArenaSlot) -> Result<&mut [T], ArenaError> {
        bytemuck::try_cast_slice_mut(self.get_mut(slot)?).map_err(ArenaError::Cast)
    }

    /// Borrow `write` mutably while keeping read access to the rest of the arena.
    pub fn split_for_write(
        &mut self,
        write: ArenaSlot,
    ) -> Result<(ReadRegion<'_>, &mut [u8]), ArenaError> {
        if write.range().end > self.buffer.len() {
            return Err(invalid(write));
        }

        let (front, rest) = self.buffer.split_at_mut(write.offset());
        let (written, back) = rest.split_at_mut(write.len());
        let region = ReadRegion {
            front,
            back,
            back_offset: write.range().end,
        };

        Ok((region, written))
    }
}

/// Read access to an arena minus the slot borrowed by [`Arena::split_for_write`].
pub struct ReadRegion<'r> {
    front: &'r [u8],
    back: &'r [u8],
    back_offset: usize,
}

impl<'r> ReadRegion<'r> {
    /// The bytes of a slot, which must not overlap the slot being written.
    pub fn get(&self, slot: ArenaSlot) -> Result<&'r [u8], ArenaError> {
        let range = slot.range();
        if range.end <= self.front.len() {
            Ok(&self.front[range])
        } else if range.start >= self.back_offset {
            let start = range.start - self.back_offset;
            self.back
                .get(start..start + slot.len())
                .ok_or(invalid(slot))
        } else {
            Err(ArenaError::Overlap)
        }
    }

    /// A record stored outside the slot being written.
    pub fn record<T: Pod>(&self, slot: ArenaSlot) -> Result<&'r T, ArenaError> {
        bytemuck::try_from_bytes(self.get(slot)?).map_err(ArenaError::Cast)
    }

    /// An array stored outside the slot being written.
    pub fn slice<T: Pod>(&self, slot: ArenaSlot) -> Result<&'r [T], ArenaError> {
        bytemuck::try_cast_slice(self.get(slot)?).map_err(ArenaError::Cast)
    }
}

/// A 16-byte aligned byte buffer usable as arena storage, including in `static` items.
#[repr(C, align(16))]
pub struct TensorArena<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> TensorArena<N> {
    /// A zeroed arena.
    pub const fn new() -> Self {
        Self { bytes: [0; N] }
    }

    /// Size in bytes.
    pub const fn len(&self) -> usize {
        N
    }

    /// Whether the arena has no storage.
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// The storage, ready to be handed to an [`Arena`].
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl<const N: usize> Default for TensorArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(offset: usize, len: usize) -> ArenaSlot {
    // The arena never exceeds u32::MAX bytes.
    ArenaSlot {
        offset: offset as u32,
        len: len as u32,
    }
}

fn invalid(slot: ArenaSlot) -> ArenaError {
    ArenaError::InvalidSlot {
        offset: slot.offset(),
        end: slot.offset() + slot.len(),
    }
}
