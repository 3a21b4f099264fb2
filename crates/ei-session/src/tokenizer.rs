//! Text <-> token conversion on top of the runtime vocabulary.

use tracing::debug;

use ei_runtime::{Fill, TokenId, Vocab};

use crate::error::{Result, SessionError};
use crate::limits::{PIECE_CAPACITY, TOKENIZE_MIN_CAPACITY, TOKENIZE_SLACK};

/// Fill a buffer of `initial` elements, growing it once to the exact size
/// the callee asks for. Returns `None` if nothing was written.
fn fill_with_retry<T: Copy + Default>(
    initial: usize,
    mut fill: impl FnMut(&mut [T]) -> Fill,
) -> Option<Vec<T>> {
    let mut buf = vec![T::default(); initial];
    let mut outcome = fill(&mut buf);
    if let Fill::NeedsCapacity(needed) = outcome {
        buf.resize(needed, T::default());
        outcome = fill(&mut buf);
    }
    match outcome {
        Fill::Written(n) if n > 0 && n <= buf.len() => {
            buf.truncate(n);
            Some(buf)
        }
        _ => None,
    }
}

/// Tokenize a prompt, adding the model's special tokens.
pub fn tokenize(vocab: &dyn Vocab, text: &str) -> Result<Vec<TokenId>> {
    let initial = (text.len() + TOKENIZE_SLACK).max(TOKENIZE_MIN_CAPACITY);
    fill_with_retry(initial, |out| vocab.tokenize(text, out, true, true)).ok_or_else(|| {
        SessionError::Tokenization(format!("no tokens for a {}-byte prompt", text.len()))
    })
}

/// Text fragment of one generated token.
///
/// A token with no printable fragment yields an empty piece; generation
/// carries on with nothing appended.
pub fn detokenize(vocab: &dyn Vocab, token: TokenId) -> Vec<u8> {
    fill_with_retry(PIECE_CAPACITY, |out| vocab.token_to_piece(token, out, true)).unwrap_or_else(
        || {
            debug!(token, "token has no text fragment");
            Vec::new()
        },
    )
}
