//! # Bounded Slot Arena
//!
//! Fixed-capacity storage with free-list recycling. Running out of slots is
//! an ordinary, reported condition. Handles carry a generation so a stale
//! handle never aliases whatever later reuses its slot.

use alloc::vec::Vec;

/// Handle to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Slot position; doubles as the minor number for device tables.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation the slot had when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
enum Slot<T> {
    Vacant { generation: u32 },
    Occupied { generation: u32, value: T },
}

/// Fixed-capacity arena.
#[derive(Debug)]
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    /// Free indices; the next allocation pops from the back
    free: Vec<u32>,
}

impl<T> SlotArena<T> {
    /// Creates an arena with exactly `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Vacant { generation: 0 });
        // Lowest index is handed out first
        let free = (0..capacity as u32).rev().collect();
        Self { slots, free }
    }

    /// Total slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.free.len() == self.slots.len()
    }

    /// True when every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Stores `value`; hands it back when the arena is full.
    pub fn insert(&mut self, value: T) -> Result<SlotId, T> {
        let Some(index) = self.free.pop() else {
            return Err(value);
        };
        let slot = &mut self.slots[index as usize];
        let generation = match slot {
            Slot::Vacant { generation } => *generation,
            Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
        };
        *slot = Slot::Occupied { generation, value };
        Ok(SlotId { index, generation })
    }

    /// Removes the value behind `id` if the handle is still current.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        self.get(id)?;
        let next = Slot::Vacant {
            generation: id.generation.wrapping_add(1),
        };
        match core::mem::replace(&mut self.slots[id.index()], next) {
            Slot::Occupied { value, .. } => {
                self.free.push(id.index);
                Some(value)
            }
            Slot::Vacant { .. } => None,
        }
    }

    /// Borrows the value behind `id`.
    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.slots.get(id.index())? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Mutably borrows the value behind `id`.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.slots.get_mut(id.index())? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Looks up whatever occupies slot `index`.
    pub fn at(&self, index: usize) -> Option<(SlotId, &T)> {
        match self.slots.get(index)? {
            Slot::Occupied { generation, value } => Some((
                SlotId {
                    index: index as u32,
                    generation: *generation,
                },
                value,
            )),
            Slot::Vacant { .. } => None,
        }
    }

    /// Iterates occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { generation, value } => Some((
                SlotId {
                    index: i as u32,
                    generation: *generation,
                },
                value,
            )),
            Slot::Vacant { .. } => None,
        })
    }

    /// Empties the arena, returning every stored value.
    pub fn drain(&mut self) -> Vec<T> {
        let ids: Vec<SlotId> = self.iter().map(|(id, _)| id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
