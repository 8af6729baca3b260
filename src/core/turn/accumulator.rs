//! Per-turn audio accumulation.

use bytes::{Bytes, BytesMut};

/// Ordered raw audio fragments of the turn in progress.
///
/// Fragments are only ever appended; [`TurnAccumulator::drain`] hands out the
/// concatenation and leaves the accumulator empty.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    fragments: Vec<Bytes>,
    total_bytes: usize,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: Bytes) {
        self.total_bytes += fragment.len();
        self.fragments.push(fragment);
    }

    /// Number of fragments received since the last drain.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Join all fragments in arrival order and reset.
    ///
    /// Returns `None` when nothing was accumulated.
    pub fn drain(&mut self) -> Option<Bytes> {
        if self.fragments.is_empty() {
            return None;
        }
        let mut joined = BytesMut::with_capacity(self.total_bytes);
        for fragment in self.fragments.drain(..) {
            joined.extend_from_slice(&fragment);
        }
        self.total_bytes = 0;
        Some(joined.freeze())
    }

    /// Discard everything without producing a buffer.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.total_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_concatenates_in_arrival_order() {
        let mut acc = TurnAccumulator::new();
        acc.push(Bytes::from_static(&[1, 2]));
        acc.push(Bytes::from_static(&[3]));
        acc.push(Bytes::from_static(&[4, 5, 6]));
        assert_eq!(acc.len(), 3);
        assert_eq!(acc.total_bytes(), 6);

        let joined = acc.drain().unwrap();
        assert_eq!(&joined[..], &[1, 2, 3, 4, 5, 6]);
        assert!(acc.is_empty());
        assert_eq!(acc.total_bytes(), 0);
    }

    #[test]
    fn test_drain_empty_is_none() {
        let mut acc = TurnAccumulator::new();
        assert!(acc.drain().is_none());
        acc.push(Bytes::from_static(&[1]));
        acc.clear();
        assert!(acc.drain().is_none());
    }
}
