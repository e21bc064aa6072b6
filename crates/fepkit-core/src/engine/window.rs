use super::decomposition::EnergyDecomposedState;
use tracing::debug;

const CAPACITY: usize = 2;

/// Fixed-capacity ring buffer of energy-decomposed states keyed by lambda index.
///
/// Slot `i % 2` holds window `i`, so inserting window `i` evicts window `i - 2`. At most
/// two states, and therefore two trajectories, are ever alive regardless of ladder length.
#[derive(Debug, Default)]
pub struct DecomposedWindow {
    slots: [Option<(usize, EnergyDecomposedState)>; CAPACITY],
}

impl DecomposedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the state of lambda window `index`, dropping whatever occupied its slot.
    ///
    /// Returns the index of the evicted window, if any.
    pub fn insert(&mut self, index: usize, state: EnergyDecomposedState) -> Option<usize> {
        let slot = &mut self.slots[index % CAPACITY];
        let evicted = slot.take().map(|(old_index, old_state)| {
            drop(old_state);
            debug!(evicted = old_index, inserted = index, "Evicted decomposed state");
            old_index
        });
        *slot = Some((index, state));
        evicted
    }

    /// Drops the state occupying the slot that window `index` will use.
    ///
    /// Calling this before building the state of window `index` keeps at most two
    /// states alive at every point, including while the new one is constructed.
    pub fn evict_for(&mut self, index: usize) -> Option<usize> {
        let (old_index, old_state) = self.slots[index % CAPACITY].take()?;
        drop(old_state);
        debug!(evicted = old_index, upcoming = index, "Evicted decomposed state");
        Some(old_index)
    }

    pub fn get(&self, index: usize) -> Option<&EnergyDecomposedState> {
        match &self.slots[index % CAPACITY] {
            Some((stored, state)) if *stored == index => Some(state),
            _ => None,
        }
    }

    /// The states of windows `index - 1` and `index`, when both are resident.
    pub fn adjacent_pair(
        &self,
        index: usize,
    ) -> Option<(&EnergyDecomposedState, &EnergyDecomposedState)> {
        let prev = self.get(index.checked_sub(1)?)?;
        let cur = self.get(index)?;
        Some((prev, cur))
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn resident_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.slots.iter().flatten().map(|(i, _)| *i).collect();
        indices.sort_unstable();
        indices
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}
