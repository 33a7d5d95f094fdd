//! Remote candidate buffering
//!
//! Candidates can arrive from the store before the remote description is
//! applied; feeding them to the connection at that point fails. They are held
//! here in store-arrival order and drained exactly once when the remote
//! description lands. After the drain the owner feeds candidates directly.

use crate::store::CandidateDoc;

/// Holds remote candidates until the remote description is applied
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<(u64, CandidateDoc)>,
    drained: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a candidate. Returns `false` once the buffer has been drained;
    /// the caller must feed the candidate directly instead.
    pub fn push(&mut self, seq: u64, doc: CandidateDoc) -> bool {
        if self.drained {
            return false;
        }
        self.pending.push((seq, doc));
        true
    }

    /// Take every buffered candidate in arrival order. Subsequent calls
    /// return nothing; the buffer never refills.
    pub fn drain(&mut self) -> Vec<(u64, CandidateDoc)> {
        self.drained = true;
        std::mem::take(&mut self.pending)
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(n: u64) -> CandidateDoc {
        CandidateDoc {
            candidate: format!("candidate:{n}"),
            sdp_mline_index: Some(0),
            sdp_mid: Some("0".to_string()),
            sender_id: "peer".to_string(),
        }
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut buffer = CandidateBuffer::new();
        for seq in 0..4 {
            assert!(buffer.push(seq, doc(seq)));
        }

        let drained = buffer.drain();
        let seqs: Vec<u64> = drained.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_drain_happens_exactly_once() {
        let mut buffer = CandidateBuffer::new();
        buffer.push(0, doc(0));

        assert_eq!(buffer.drain().len(), 1);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_push_after_drain_rejected() {
        let mut buffer = CandidateBuffer::new();
        buffer.drain();
        assert!(!buffer.push(0, doc(0)));
        assert!(buffer.drain().is_empty());
    }
}
