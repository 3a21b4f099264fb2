use std::time::Duration;

use crate::generate::Termination;

/// The result of one completion request.
///
/// A truncated answer is a normal result: `termination` says why the
/// generation loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub termination: Termination,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub prefill_time: Duration,
    pub generation_time: Duration,
}

/// Turn raw output bytes into text no longer than `max_bytes`.
///
/// Invalid UTF-8 (e.g. a multi-byte character cut by the size limit) is
/// replaced, and the replacement never pushes the text past the limit.
pub(crate) fn finish_text(output: Vec<u8>, max_bytes: usize) -> String {
    let mut text = match String::from_utf8(output) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    if text.len() > max_bytes {
        let mut cut = max_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_utf8_untouched() {
        assert_eq!(finish_text("héllo".as_bytes().to_vec(), 4096), "héllo");
    }

    #[test]
    fn test_cut_character_replaced_within_limit() {
        // "é" is two bytes; keep only the first.
        let mut bytes = b"abc".to_vec();
        bytes.push("é".as_bytes()[0]);
        let text = finish_text(bytes, 4);
        assert!(text.len() <= 4);
        assert!(text.starts_with("abc"));
    }

    #[test]
    fn test_empty() {
        assert_eq!(finish_text(Vec::new(), 4096), "");
    }
}
