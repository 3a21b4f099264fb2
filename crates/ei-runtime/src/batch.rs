use crate::error::{Result, RuntimeError};
use crate::types::{Pos, SeqId, TokenId};

/// One token submitted to a decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    /// Token id to decode.
    pub token: TokenId,
    /// Absolute position of the token in its sequence.
    pub pos: Pos,
    /// Sequence the token belongs to.
    pub seq_id: SeqId,
    /// Whether the runtime should compute logits for this token.
    pub logits: bool,
}

/// A fixed-capacity set of tokens decoded by a single runtime call.
///
/// A batch is transient: it is built for one decode (or reused across the
/// chunks of one prefill via [`Batch::clear`]) and released when dropped.
#[derive(Debug, Clone)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    capacity: usize,
}

impl Batch {
    /// Create an empty batch that holds at most `capacity` tokens.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// A one-token batch that requests logits, used for generation steps.
    pub fn single(token: TokenId, pos: Pos, seq_id: SeqId) -> Self {
        Self {
            entries: vec![BatchEntry {
                token,
                pos,
                seq_id,
                logits: true,
            }],
            capacity: 1,
        }
    }

    /// Append a token. Fails once the batch holds `capacity` tokens.
    pub fn push(&mut self, token: TokenId, pos: Pos, seq_id: SeqId, logits: bool) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(RuntimeError::BatchFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(BatchEntry {
            token,
            pos,
            seq_id,
            logits,
        });
        Ok(())
    }

    /// Remove all tokens, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the last entry that requests logits, if any.
    pub fn last_logits_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.logits)
    }
}
