//! Host-side handle table.
//!
//! Maps small integers to host values. Free slots form a singly linked list
//! threaded through the slot array itself: a free slot stores the index of
//! the next free slot, and the tail of the list is the table length.
//!
//! ```text
//!  index:  0     1     2     3     4        5        6
//!  slot :  undef null  true  false Occ(v)   Free(7)  Occ(w)     next_free = 5
//! ```

use tether_types::{Handle, HostValue};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

#[derive(Clone)]
enum Slot {
    Occupied(HostValue),
    Free(u32),
}

/// Growable slot array mapping handles to host values.
pub struct HandleTable {
    slots: Vec<Slot>,
    next_free: u32,
    live: usize,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a table with room for `capacity` handles beyond the sentinels.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(Handle::RESERVED as usize + capacity);
        slots.push(Slot::Occupied(HostValue::Undefined));
        slots.push(Slot::Occupied(HostValue::Null));
        slots.push(Slot::Occupied(HostValue::Bool(true)));
        slots.push(Slot::Occupied(HostValue::Bool(false)));
        Self {
            next_free: slots.len() as u32,
            slots,
            live: 0,
        }
    }

    /// Store `value` and return its handle. Never returns a reserved handle.
    pub fn alloc(&mut self, value: HostValue) -> BridgeResult<Handle> {
        if self.next_free as usize == self.slots.len() {
            if self.slots.len() == self.slots.capacity() {
                debug!(len = self.slots.len(), "handle table growing");
            }
            let tail = self.slots.len() as u32 + 1;
            self.slots.push(Slot::Free(tail));
        }

        let idx = self.next_free;
        let handle = Handle(idx);
        if handle.is_reserved() {
            return Err(BridgeError::CorruptHandleTable {
                handle,
                reason: "free list points into the reserved prefix",
            });
        }
        let next = match self.slots.get(idx as usize) {
            Some(Slot::Free(next)) => *next,
            Some(Slot::Occupied(_)) => {
                return Err(BridgeError::CorruptHandleTable {
                    handle,
                    reason: "free list head is occupied",
                })
            }
            None => {
                return Err(BridgeError::CorruptHandleTable {
                    handle,
                    reason: "free list head is out of range",
                })
            }
        };

        self.next_free = next;
        self.slots[idx as usize] = Slot::Occupied(value);
        self.live += 1;
        Ok(handle)
    }

    /// Look up a live handle.
    pub fn get(&self, handle: Handle) -> BridgeResult<&HostValue> {
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(value)) => Ok(value),
            _ => Err(BridgeError::InvalidHandle(handle)),
        }
    }

    /// `get` followed by `free`. Reserved handles yield their sentinel.
    pub fn take(&mut self, handle: Handle) -> BridgeResult<HostValue> {
        let value = self.get(handle)?.clone();
        self.free(handle)?;
        Ok(value)
    }

    /// Return a slot to the free list. No-op for the reserved prefix.
    pub fn free(&mut self, handle: Handle) -> BridgeResult<()> {
        if handle.is_reserved() {
            return Ok(());
        }
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(_)) => {}
            Some(Slot::Free(_)) => {
                return Err(BridgeError::CorruptHandleTable {
                    handle,
                    reason: "double free",
                })
            }
            None => return Err(BridgeError::InvalidHandle(handle)),
        }
        self.slots[handle.0 as usize] = Slot::Free(self.next_free);
        self.next_free = handle.0;
        self.live -= 1;
        Ok(())
    }

    /// A second, independently owned handle to the same value.
    pub fn clone_ref(&mut self, handle: Handle) -> BridgeResult<Handle> {
        let value = self.get(handle)?.clone();
        self.alloc(value)
    }

    /// Number of live, non-reserved handles.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Total number of slots, including reserved and free ones.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        matches!(self.slots.get(handle.0 as usize), Some(Slot::Occupied(_)))
    }

    /// Walk the free list and check the structural invariants: every
    /// non-reserved slot is either occupied or on the free list exactly once,
    /// and the list ends at the table length.
    pub fn validate(&self) -> BridgeResult<()> {
        let len = self.slots.len();
        let mut seen = vec![false; len];
        let mut cursor = self.next_free;
        let mut steps = 0usize;

        while cursor as usize != len {
            let handle = Handle(cursor);
            if handle.is_reserved() {
                return Err(BridgeError::CorruptHandleTable {
                    handle,
                    reason: "free list points into the reserved prefix",
                });
            }
            let next = match self.slots.get(cursor as usize) {
                Some(Slot::Free(next)) => *next,
                Some(Slot::Occupied(_)) => {
                    return Err(BridgeError::CorruptHandleTable {
                        handle,
                        reason: "occupied slot on the free list",
                    })
                }
                None => {
                    return Err(BridgeError::CorruptHandleTable {
                        handle,
                        reason: "free list runs past the table",
                    })
                }
            };
            if std::mem::replace(&mut seen[cursor as usize], true) {
                return Err(BridgeError::CorruptHandleTable {
                    handle,
                    reason: "cycle in free list",
                });
            }
            steps += 1;
            cursor = next;
        }

        let free_slots = self
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Free(_)))
            .count();
        if steps != free_slots {
            return Err(BridgeError::CorruptHandleTable {
                handle: Handle(self.next_free),
                reason: "free slot unreachable from the free list",
            });
        }
        Ok(())
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_resolve() {
        let table = HandleTable::new();
        assert!(matches!(table.get(Handle::UNDEFINED), Ok(HostValue::Undefined)));
        assert!(matches!(table.get(Handle::NULL), Ok(HostValue::Null)));
        assert!(matches!(table.get(Handle::TRUE), Ok(HostValue::Bool(true))));
        assert!(matches!(table.get(Handle::FALSE), Ok(HostValue::Bool(false))));
    }

    #[test]
    fn first_alloc_skips_reserved_prefix() {
        let mut table = HandleTable::new();
        let h = table.alloc(HostValue::Number(1.0)).unwrap();
        assert_eq!(h, Handle(Handle::RESERVED));
    }

    #[test]
    fn freed_slot_is_reused_lifo() {
        let mut table = HandleTable::new();
        let a = table.alloc(1.0.into()).unwrap();
        let b = table.alloc(2.0.into()).unwrap();
        table.free(a).unwrap();
        table.free(b).unwrap();
        assert_eq!(table.alloc(3.0.into()).unwrap(), b);
        assert_eq!(table.alloc(4.0.into()).unwrap(), a);
        table.validate().unwrap();
    }

    #[test]
    fn freeing_reserved_is_noop() {
        let mut table = HandleTable::new();
        for raw in 0..Handle::RESERVED {
            table.free(Handle(raw)).unwrap();
        }
        table.validate().unwrap();
        assert!(matches!(table.get(Handle::TRUE), Ok(HostValue::Bool(true))));
        assert_eq!(table.alloc(HostValue::Null).unwrap(), Handle(Handle::RESERVED));
    }

    #[test]
    fn take_frees_slot() {
        let mut table = HandleTable::new();
        let h = table.alloc("x".into()).unwrap();
        assert_eq!(table.take(h).unwrap().as_str(), Some("x"));
        assert_eq!(table.get(h).unwrap_err(), BridgeError::InvalidHandle(h));
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn take_reserved_keeps_sentinel() {
        let mut table = HandleTable::new();
        assert!(matches!(table.take(Handle::NULL), Ok(HostValue::Null)));
        assert!(matches!(table.get(Handle::NULL), Ok(HostValue::Null)));
    }

    #[test]
    fn double_free_is_corruption() {
        let mut table = HandleTable::new();
        let h = table.alloc(1.0.into()).unwrap();
        table.free(h).unwrap();
        assert!(matches!(
            table.free(h),
            Err(BridgeError::CorruptHandleTable { reason: "double free", .. })
        ));
    }

    #[test]
    fn out_of_range_is_invalid() {
        let table = HandleTable::new();
        assert_eq!(
            table.get(Handle(99)).unwrap_err(),
            BridgeError::InvalidHandle(Handle(99))
        );
    }

    #[test]
    fn clone_ref_aliases_value() {
        let mut table = HandleTable::new();
        let a = table.alloc(HostValue::object(vec![1u8, 2, 3])).unwrap();
        let b = table.clone_ref(a).unwrap();
        assert_ne!(a, b);
        assert!(table.get(a).unwrap().same_ref(table.get(b).unwrap()));
        table.free(a).unwrap();
        assert!(table.get(b).is_ok());
    }
}
