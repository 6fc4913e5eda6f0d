//! Fixed-capacity slot arena for live connections.
//!
//! Each cell holds zero or one occupant. Allocation is a linear first-fit
//! scan: the lowest free index is always handed out, so a freed slot is the
//! first candidate for the next connection. The scan only runs on connect,
//! never per message, and capacities are expected to be small.

use std::fmt;

/// Index of a cell in the slot table, in `[0, capacity)`.
///
/// Stable for the whole lifetime of the connection occupying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Arena of optional cells with a capacity fixed at construction.
#[derive(Debug)]
pub struct SlotTable<T> {
    cells: Vec<Option<T>>,
    occupied: usize,
}

impl<T> SlotTable<T> {
    /// Creates a table with `capacity` empty cells. It never grows.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: std::iter::repeat_with(|| None).take(capacity).collect(),
            occupied: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupied
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupied == self.cells.len()
    }

    /// Lowest free index, if any.
    #[must_use]
    pub fn first_free(&self) -> Option<SlotId> {
        self.cells.iter().position(Option::is_none).map(SlotId)
    }

    /// Places a new occupant in the first free cell.
    ///
    /// `make` receives the chosen slot so the occupant can record it. Returns
    /// `None` without calling `make` when the table is full.
    pub fn occupy(&mut self, make: impl FnOnce(SlotId) -> T) -> Option<SlotId> {
        let slot = self.first_free()?;
        self.cells[slot.0] = Some(make(slot));
        self.occupied += 1;
        Some(slot)
    }

    /// Returns the occupant of `slot`, or `None` if empty or out of range.
    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&T> {
        self.cells.get(slot.0).and_then(Option::as_ref)
    }

    /// Frees `slot`, returning its previous occupant.
    ///
    /// Freeing an empty or out-of-range slot is a no-op.
    pub fn release(&mut self, slot: SlotId) -> Option<T> {
        self.release_if(slot, |_| true)
    }

    /// Frees `slot` only if its occupant satisfies `matches`.
    ///
    /// Used to ignore late close events from a connection that no longer
    /// owns the slot.
    pub fn release_if(&mut self, slot: SlotId, matches: impl FnOnce(&T) -> bool) -> Option<T> {
        let cell = self.cells.get_mut(slot.0)?;
        if !cell.as_ref().is_some_and(matches) {
            return None;
        }
        let previous = cell.take();
        self.occupied -= 1;
        previous
    }

    /// Iterates occupied cells in slot order.
    pub fn occupied(&self) -> impl Iterator<Item = (SlotId, &T)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| cell.as_ref().map(|value| (SlotId(idx), value)))
    }

    /// Empties every cell, returning the previous occupants in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        self.occupied = 0;
        self.cells.iter_mut().filter_map(Option::take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_with_fixed_capacity() {
        let table: SlotTable<u32> = SlotTable::with_capacity(3);
        assert_eq!(table.capacity(), 3);
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
        assert!(!table.is_full());
        assert_eq!(table.first_free(), Some(SlotId(0)));
    }

    #[test]
    fn occupies_first_fit_until_full() {
        let mut table = SlotTable::with_capacity(3);
        assert_eq!(table.occupy(|s| s.0 * 10), Some(SlotId(0)));
        assert_eq!(table.occupy(|s| s.0 * 10), Some(SlotId(1)));
        assert_eq!(table.occupy(|s| s.0 * 10), Some(SlotId(2)));
        assert!(table.is_full());

        let mut called = false;
        assert_eq!(
            table.occupy(|_| {
                called = true;
                0
            }),
            None
        );
        assert!(!called, "make must not run when the table is full");
        assert_eq!(table.get(SlotId(2)), Some(&20));
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut table: SlotTable<u8> = SlotTable::with_capacity(0);
        assert!(table.is_full());
        assert_eq!(table.occupy(|_| 1), None);
    }

    #[test]
    fn freed_slot_is_reused_first() {
        let mut table = SlotTable::with_capacity(4);
        for _ in 0..4 {
            table.occupy(|s| s.0);
        }
        assert_eq!(table.release(SlotId(2)), Some(2));
        assert_eq!(table.release(SlotId(1)), Some(1));

        // Lowest free index wins, regardless of release order.
        assert_eq!(table.occupy(|_| 100), Some(SlotId(1)));
        assert_eq!(table.occupy(|_| 200), Some(SlotId(2)));
        assert_eq!(table.get(SlotId(1)), Some(&100));
    }

    #[test]
    fn other_occupants_keep_their_slots() {
        let mut table = SlotTable::with_capacity(3);
        table.occupy(|_| "a");
        table.occupy(|_| "b");
        table.occupy(|_| "c");

        table.release(SlotId(0));
        table.occupy(|_| "d");

        assert_eq!(table.get(SlotId(0)), Some(&"d"));
        assert_eq!(table.get(SlotId(1)), Some(&"b"));
        assert_eq!(table.get(SlotId(2)), Some(&"c"));
    }

    #[test]
    fn release_is_idempotent() {
        let mut table = SlotTable::with_capacity(2);
        table.occupy(|_| 'x');
        assert_eq!(table.release(SlotId(0)), Some('x'));
        assert_eq!(table.release(SlotId(0)), None);
        assert_eq!(table.release(SlotId(99)), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn release_if_checks_occupant() {
        let mut table = SlotTable::with_capacity(1);
        table.occupy(|_| 7_u64);
        assert_eq!(table.release_if(SlotId(0), |v| *v == 8), None);
        assert_eq!(table.len(), 1);
        assert_eq!(table.release_if(SlotId(0), |v| *v == 7), Some(7));
        assert!(table.is_empty());
    }

    #[test]
    fn occupied_iterates_in_slot_order() {
        let mut table = SlotTable::with_capacity(4);
        for _ in 0..4 {
            table.occupy(|s| s.0);
        }
        table.release(SlotId(1));

        let slots: Vec<SlotId> = table.occupied().map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![SlotId(0), SlotId(2), SlotId(3)]);
    }

    #[test]
    fn drain_clears_everything() {
        let mut table = SlotTable::with_capacity(3);
        table.occupy(|_| 1);
        table.occupy(|_| 2);

        assert_eq!(table.drain(), vec![1, 2]);
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 3);
        assert_eq!(table.first_free(), Some(SlotId(0)));
    }
}
