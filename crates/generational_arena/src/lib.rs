//! Slot arena with generation-checked indices.
//!
//! Slots are either occupied or linked into a free list. Removing a value bumps the arena
//! generation, so an [`Index`] kept past removal no longer resolves, even after the slot is
//! reused. Storage only ever grows, which keeps slot positions stable.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Index {
    slot: usize,
    generation: u64,
}

impl Index {
    pub fn slot(self) -> usize {
        self.slot
    }
}

#[derive(Debug, Clone)]
enum Entry<T> {
    Free { next_free: Option<usize> },
    Occupied { value: T, generation: u64 },
}

#[derive(Debug, Clone)]
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_list_head: Option<usize>,
    generation: u64,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list_head: None,
            generation: 0,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut arena = Self::new();
        arena.reserve(capacity);
        arena
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Grows the slot count to `new_capacity`. Never shrinks.
    ///
    /// The new slots are chained in order and placed ahead of the previous free list head.
    pub fn reserve(&mut self, new_capacity: usize) {
        let start = self.entries.len();
        if new_capacity <= start {
            return;
        }

        self.entries.reserve_exact(new_capacity - start);
        let previous_head = self.free_list_head;
        for slot in start..new_capacity - 1 {
            self.entries.push(Entry::Free {
                next_free: Some(slot + 1),
            });
        }
        self.entries.push(Entry::Free {
            next_free: previous_head,
        });
        self.free_list_head = Some(start);
    }

    /// Inserts into reserved space only. Hands the value back when no slot is free.
    pub fn try_insert(&mut self, value: T) -> Result<Index, T> {
        let Some(slot) = self.free_list_head else {
            return Err(value);
        };

        let entry = &mut self.entries[slot];
        let Entry::Free { next_free } = *entry else {
            panic!("arena free list is corrupted: head slot {slot} is occupied");
        };
        self.free_list_head = next_free;
        *entry = Entry::Occupied {
            value,
            generation: self.generation,
        };
        self.len += 1;

        Ok(Index {
            slot,
            generation: self.generation,
        })
    }

    /// Inserts a value, doubling the slot count when the arena is full.
    pub fn insert(&mut self, value: T) -> Index {
        match self.try_insert(value) {
            Ok(index) => index,
            Err(value) => {
                let grown = (self.entries.len() * 2).max(1);
                self.reserve(grown);
                self.try_insert(value)
                    .unwrap_or_else(|_| panic!("arena has no free slot after growing to {grown}"))
            }
        }
    }

    pub fn remove(&mut self, index: Index) -> Option<T> {
        if !self.contains(index) {
            return None;
        }

        let entry = std::mem::replace(
            &mut self.entries[index.slot],
            Entry::Free {
                next_free: self.free_list_head,
            },
        );
        self.free_list_head = Some(index.slot);
        self.generation += 1;
        self.len -= 1;

        match entry {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Free { .. } => unreachable!("contains() accepted a free slot"),
        }
    }

    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        match self.entries.get(index.slot) {
            Some(Entry::Occupied { value, generation }) if *generation == index.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        match self.entries.get_mut(index.slot) {
            Some(Entry::Occupied { value, generation }) if *generation == index.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Frees every slot. Capacity is kept and all outstanding indices become stale.
    pub fn clear(&mut self) {
        let capacity = self.entries.len();
        self.entries.clear();
        self.free_list_head = None;
        self.len = 0;
        self.generation += 1;
        self.reserve(capacity);
    }
}
