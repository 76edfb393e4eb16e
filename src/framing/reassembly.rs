// PartialMessage - in-progress reassembly of one correlation id's frames.

use std::collections::HashMap;
use std::time::Instant;

pub struct PartialMessage {
    pub total: u16,
    received: HashMap<u16, Vec<u8>>,
    pub started_at: Instant,
}

impl PartialMessage {
    pub fn new(total: u16) -> Self {
        Self {
            total,
            received: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Duplicate sequence numbers overwrite silently; the CRC is the
    /// integrity gate, not first-wins/last-wins bookkeeping.
    pub fn insert(&mut self, sequence: u16, payload: Vec<u8>) {
        self.received.insert(sequence, payload);
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total as usize
    }

    /// Concatenate fragments in ascending sequence order. Only meaningful
    /// once `is_complete()` holds.
    pub fn concat(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for seq in 0..self.total {
            if let Some(chunk) = self.received.remove(&seq) {
                out.extend_from_slice(&chunk);
            }
        }
        out
    }
}
