//! Bookkeeping of the bulk-in transfers one acquisition keeps in flight

use crate::{
    core::{
        DeviceHandle,
        TRANSFER_POOL_SIZE,
    },
    transport::TransferToken,
};

/// Number of transfers submitted and not yet retired
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SubmitCounter(usize);

impl SubmitCounter {
    pub fn submit(&mut self) {
        self.0 += 1;
    }

    /// Count one transfer as retired. True when it was the last one.
    pub fn retire(&mut self) -> bool {
        debug_assert!(self.0 > 0, "retired more transfers than were submitted");
        self.0 = self.0.saturating_sub(1);
        self.0 == 0
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0
    }
}

/// Fixed set of transfer slots. A slot is occupied from submission until its transfer retires.
#[derive(Debug)]
pub struct TransferPool {
    device: DeviceHandle,
    generation: u32,
    occupied: [bool; TRANSFER_POOL_SIZE],
    submitted: SubmitCounter,
}

impl TransferPool {
    #[must_use]
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            generation: 0,
            occupied: [false; TRANSFER_POOL_SIZE],
            submitted: SubmitCounter::default(),
        }
    }

    /// Start a new acquisition. Completions carrying an older generation no longer match.
    pub fn next_generation(&mut self) {
        debug_assert!(self.is_empty());
        self.generation = self.generation.wrapping_add(1);
    }

    #[must_use]
    pub fn token(&self, slot: usize) -> TransferToken {
        TransferToken {
            device: self.device,
            slot,
            generation: self.generation,
        }
    }

    /// Mark `slot` as holding a submitted transfer
    pub fn occupy(&mut self, slot: usize) {
        if let Some(o) = self.occupied.get_mut(slot) {
            debug_assert!(!*o, "slot {slot} submitted twice");
            *o = true;
            self.submitted.submit();
        }
    }

    /// Whether `token` names a transfer of the current acquisition that hasn't retired
    #[must_use]
    pub fn owns(&self, token: &TransferToken) -> bool {
        token.device == self.device
            && token.generation == self.generation
            && self.occupied.get(token.slot).copied().unwrap_or(false)
    }

    /// Free `slot`. True when it was the last occupied one.
    pub fn retire(&mut self, slot: usize) -> bool {
        match self.occupied.get_mut(slot) {
            Some(o) if *o => {
                *o = false;
                let last = self.submitted.retire();
                debug_assert_eq!(self.submitted.count(), self.in_flight().count());
                last
            }
            _ => false,
        }
    }

    /// Tokens of every occupied slot
    pub fn in_flight(&self) -> impl Iterator<Item = TransferToken> + '_ {
        self.occupied
            .iter()
            .enumerate()
            .filter(|(_, o)| **o)
            .map(|(slot, _)| self.token(slot))
    }

    #[must_use]
    pub fn submitted(&self) -> usize {
        self.submitted.count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.submitted.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let mut c = SubmitCounter::default();
        c.submit();
        c.submit();
        assert!(!c.retire());
        assert!(c.retire());
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn test_pool_lifecycle() {
        let mut pool = TransferPool::new(DeviceHandle(7));
        pool.next_generation();
        for slot in 0..TRANSFER_POOL_SIZE {
            pool.occupy(slot);
        }
        assert_eq!(pool.submitted(), TRANSFER_POOL_SIZE);
        let stale = TransferToken {
            generation: 0,
            ..pool.token(1)
        };
        assert!(pool.owns(&pool.token(1)));
        assert!(!pool.owns(&stale));
        assert!(!pool.retire(1));
        // Retiring a free slot changes nothing
        assert!(!pool.retire(1));
        assert!(!pool.owns(&pool.token(1)));
        assert_eq!(pool.in_flight().count(), TRANSFER_POOL_SIZE - 1);
        assert!(!pool.retire(0));
        assert!(!pool.retire(2));
        assert!(pool.retire(3));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_generations() {
        let mut pool = TransferPool::new(DeviceHandle(0));
        pool.next_generation();
        let first = pool.token(0);
        pool.next_generation();
        assert_ne!(pool.token(0), first);
        pool.occupy(0);
        assert!(!pool.owns(&first));
    }
}
