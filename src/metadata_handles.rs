//! Handles to class, method and constant pool metadata held by the compiler.
//!
//! The compiler cannot hold raw metadata pointers: classes can be redefined or unloaded while a
//! compiler-side wrapper object is still alive. Instead it holds a [`MetadataHandle`], an index of
//! a cell in this registry. The GC visits the cells with [`MetadataHandles::metadata_do`], class
//! unloading marks the cells of dying classes, and cells come back for reuse in two steps: the
//! compiler clears a cell when its wrapper dies ([`MetadataHandles::clear`]), and the next free list
//! rebuild picks the cleared cells up.
//!
//! Cells are allocated from blocks of [`BLOCK_SIZE`] that are filled densely and never freed.

use std::num::NonZeroU64;
use std::sync::Mutex;

use portable_atomic::{AtomicU128, Ordering};
use spin::RwLock;

use crate::util::Address;
use crate::vm::{MetadataKind, MetadataRef};

/// Number of cells in a block.
pub const BLOCK_SIZE: usize = 32;

/// A handle to a metadata cell, as stored in the compiler's `long` fields. Never zero.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MetadataHandle(NonZeroU64);

impl MetadataHandle {
    fn from_index(index: usize) -> MetadataHandle {
        MetadataHandle(NonZeroU64::MIN.saturating_add(index as u64))
    }

    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    pub fn as_jlong(self) -> i64 {
        self.0.get() as i64
    }

    pub fn from_jlong(raw: i64) -> Option<MetadataHandle> {
        NonZeroU64::new(raw as u64).map(MetadataHandle)
    }
}

/// The decoded state of a cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlotState {
    /// Released by the compiler. Reused by the next free list rebuild.
    Cleared,
    InUse(MetadataRef),
    /// On the free list. `next` is the next free cell.
    Free { next: Option<usize> },
    /// The metadata was unloaded. The cell is no longer scanned, but it is not reused until the
    /// compiler clears it.
    Unloaded,
}

const TAG_CLEARED: u64 = 0;
const TAG_KLASS: u64 = 1;
const TAG_METHOD: u64 = 2;
const TAG_CONSTANT_POOL: u64 = 3;
const TAG_FREE: u64 = 4;
const TAG_UNLOADED: u64 = 5;

impl SlotState {
    fn encode(self) -> u128 {
        let (tag, payload) = match self {
            SlotState::Cleared => (TAG_CLEARED, 0),
            SlotState::InUse(md) => {
                let tag = match md.kind {
                    MetadataKind::Klass => TAG_KLASS,
                    MetadataKind::Method => TAG_METHOD,
                    MetadataKind::ConstantPool => TAG_CONSTANT_POOL,
                };
                (tag, md.address.as_usize() as u64)
            }
            SlotState::Free { next } => (TAG_FREE, next.map_or(0, |n| n as u64 + 1)),
            SlotState::Unloaded => (TAG_UNLOADED, 0),
        };
        ((tag as u128) << 64) | payload as u128
    }

    fn decode(raw: u128) -> SlotState {
        let tag = (raw >> 64) as u64;
        let payload = raw as u64;
        let in_use = |kind| {
            SlotState::InUse(MetadataRef {
                address: unsafe { Address::from_usize(payload as usize) },
                kind,
            })
        };
        match tag {
            TAG_CLEARED => SlotState::Cleared,
            TAG_KLASS => in_use(MetadataKind::Klass),
            TAG_METHOD => in_use(MetadataKind::Method),
            TAG_CONSTANT_POOL => in_use(MetadataKind::ConstantPool),
            TAG_FREE => SlotState::Free {
                next: payload.checked_sub(1).map(|n| n as usize),
            },
            TAG_UNLOADED => SlotState::Unloaded,
            _ => unreachable!("corrupt metadata handle cell {:#x}", raw),
        }
    }
}

struct HandleSlot(AtomicU128);

impl HandleSlot {
    fn load(&self) -> SlotState {
        SlotState::decode(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: SlotState) {
        self.0.store(state.encode(), Ordering::Release)
    }

    fn compare_exchange(&self, current: SlotState, new: SlotState) -> Result<SlotState, SlotState> {
        self.0
            .compare_exchange(current.encode(), new.encode(), Ordering::AcqRel, Ordering::Acquire)
            .map(SlotState::decode)
            .map_err(SlotState::decode)
    }
}

struct HandleBlock {
    slots: [HandleSlot; BLOCK_SIZE],
}

impl HandleBlock {
    fn new() -> Box<HandleBlock> {
        Box::new(HandleBlock {
            slots: std::array::from_fn(|_| HandleSlot(AtomicU128::new(SlotState::Cleared.encode()))),
        })
    }
}

/// The allocation state. Guarded by the registry lock.
struct FreeListState {
    /// Number of cells handed out from fresh blocks. Cells below this index have been used.
    top: usize,
    free_list: Option<usize>,
    /// Number of blocks to append before the free list is rebuilt again.
    allocate_before_rebuild: usize,
}

pub struct MetadataHandles {
    blocks: RwLock<Vec<Box<HandleBlock>>>,
    state: Mutex<FreeListState>,
}

impl Default for MetadataHandles {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataHandles {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(vec![HandleBlock::new()]),
            state: Mutex::new(FreeListState {
                top: 0,
                free_list: None,
                allocate_before_rebuild: 0,
            }),
        }
    }

    fn with_slot<R>(&self, index: usize, f: impl FnOnce(&HandleSlot) -> R) -> Option<R> {
        let blocks = self.blocks.read();
        blocks
            .get(index / BLOCK_SIZE)
            .map(|block| f(&block.slots[index % BLOCK_SIZE]))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FreeListState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a cell for the metadata. Never fails: if there is no free cell, a new block is
    /// added or the free list is rebuilt from cleared cells.
    pub fn allocate(&self, metadata: MetadataRef) -> MetadataHandle {
        let mut state = self.lock_state();
        let handle = loop {
            let capacity = self.blocks.read().len() * BLOCK_SIZE;
            // Fresh cells in the last block
            if state.top < capacity {
                let index = state.top;
                state.top += 1;
                break index;
            }
            // The free list
            if let Some(index) = state.free_list {
                let next = self.with_slot(index, |slot| match slot.load() {
                    SlotState::Free { next } => next,
                    other => panic!("metadata handle {} on the free list is {:?}", index, other),
                });
                state.free_list = next.flatten();
                break index;
            }
            if state.allocate_before_rebuild == 0 {
                self.rebuild_free_list(&mut state);
                if state.free_list.is_none() && state.allocate_before_rebuild == 0 {
                    // Nothing was cleared and the heuristic asked for no growth. Grow anyway.
                    state.allocate_before_rebuild = 1;
                }
            } else {
                self.blocks.write().push(HandleBlock::new());
                state.allocate_before_rebuild -= 1;
            }
        };
        self.with_slot(handle, |slot| slot.store(SlotState::InUse(metadata)));
        trace!("Allocated metadata handle {} for {:?}", handle, metadata);
        #[cfg(feature = "extreme_assertions")]
        self.verify_free_list(&state);
        MetadataHandle::from_index(handle)
    }

    /// Put every cleared cell on the free list. If fewer than half of the cells turn out to be
    /// free, schedule enough new blocks to be added before the next rebuild.
    fn rebuild_free_list(&self, state: &mut FreeListState) {
        debug_assert!(state.free_list.is_none() && state.allocate_before_rebuild == 0);
        let blocks = self.blocks.read();
        let mut free = 0;
        for index in 0..state.top {
            let slot = &blocks[index / BLOCK_SIZE].slots[index % BLOCK_SIZE];
            if slot.load() == SlotState::Cleared {
                slot.store(SlotState::Free {
                    next: state.free_list,
                });
                state.free_list = Some(index);
                free += 1;
            }
        }
        let total = blocks.len() * BLOCK_SIZE;
        let extra = total as isize - 2 * free as isize;
        if extra > 0 {
            state.allocate_before_rebuild = (extra as usize).div_ceil(BLOCK_SIZE);
        }
        debug!(
            "Rebuilt metadata handle free list: {} of {} cells free, {} blocks to add before the next rebuild",
            free, total, state.allocate_before_rebuild
        );
    }

    /// Return a cell to the free list.
    pub fn release(&self, handle: MetadataHandle) {
        let mut state = self.lock_state();
        let index = handle.index();
        let next = state.free_list;
        let released = self.with_slot(index, |slot| {
            debug_assert!(
                !matches!(slot.load(), SlotState::Free { .. }),
                "metadata handle {} released twice",
                index
            );
            slot.store(SlotState::Free { next });
        });
        if released.is_some() {
            state.free_list = Some(index);
        }
        #[cfg(feature = "extreme_assertions")]
        self.verify_free_list(&state);
    }

    /// Clear a cell whose compiler-side owner died. This does not take the registry lock. The cell
    /// becomes reusable at the next free list rebuild.
    pub fn clear(&self, handle: MetadataHandle) {
        self.with_slot(handle.index(), |slot| slot.store(SlotState::Cleared));
    }

    /// The metadata the handle refers to, or `None` if the cell is not in use.
    pub fn get(&self, handle: MetadataHandle) -> Option<MetadataRef> {
        self.with_slot(handle.index(), |slot| match slot.load() {
            SlotState::InUse(md) => Some(md),
            _ => None,
        })
        .flatten()
    }

    /// Visit the metadata of every cell in use. Cells cleared or released concurrently may or may
    /// not be visited.
    pub fn metadata_do<F: FnMut(MetadataRef)>(&self, mut visitor: F) {
        // Same lock order as `allocate`: the free list state, then the blocks.
        let state = self.lock_state();
        let blocks = self.blocks.read();
        let top = state.top;
        for (i, block) in blocks.iter().enumerate() {
            let block_top = top.saturating_sub(i * BLOCK_SIZE).min(BLOCK_SIZE);
            for slot in block.slots[..block_top].iter() {
                if let SlotState::InUse(md) = slot.load() {
                    visitor(md);
                }
            }
            // Blocks are filled densely, so nothing after a partially filled block is in use
            if block_top < BLOCK_SIZE {
                break;
            }
        }
    }

    /// Mark the cells whose metadata belongs to an unloading class loader. A marked cell is not
    /// visited any more, but it is only reused after the compiler clears it.
    pub fn do_unloading<F: Fn(MetadataRef) -> bool>(&self, is_unloading: F) {
        let _state = self.lock_state();
        let blocks = self.blocks.read();
        for block in blocks.iter() {
            for slot in block.slots.iter() {
                let current = slot.load();
                if let SlotState::InUse(md) = current {
                    if is_unloading(md) {
                        match slot.compare_exchange(current, SlotState::Unloaded) {
                            Ok(_) => trace!("Unloaded metadata handle for {:?}", md),
                            // The compiler may clear the cell concurrently, which is the only other possible value
                            Err(other) => assert_eq!(other, SlotState::Cleared, "unexpected metadata handle state"),
                        }
                    }
                }
            }
        }
    }

    /// Number of cells in use.
    pub fn count_in_use(&self) -> usize {
        let mut count = 0;
        self.metadata_do(|_| count += 1);
        count
    }

    /// Number of allocated blocks.
    pub fn number_of_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    #[cfg(feature = "extreme_assertions")]
    fn verify_free_list(&self, state: &FreeListState) {
        let mut cursor = state.free_list;
        let mut steps = 0;
        while let Some(index) = cursor {
            steps += 1;
            assert!(steps <= state.top, "cycle in metadata handle free list");
            cursor = match self.with_slot(index, |slot| slot.load()) {
                Some(SlotState::Free { next }) => next,
                other => panic!("metadata handle {} on the free list is {:?}", index, other),
            };
        }
    }
}
