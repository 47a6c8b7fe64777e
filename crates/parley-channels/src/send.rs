//! Text splitting for channel size limits.
//!
//! WhatsApp rejects text bodies over 4096 characters (not bytes), and an
//! interactive body over 1024.

/// Maximum characters per text message.
pub const TEXT_CHUNK_MAX: usize = 4096;
/// Maximum characters in the body of a button message.
pub const INTERACTIVE_BODY_MAX: usize = 1024;

/// Split `text` into chunks of at most `max` characters.
///
/// Prefers to break at the last newline, then the last space, inside each
/// window; a run with neither is cut hard at `max`.
pub fn split_chunks(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max {
        // byte offset of the first char past the window
        let window_end = remaining
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_chunks("Hola", TEXT_CHUNK_MAX), vec!["Hola"]);
    }

    #[test]
    fn exactly_max_is_single_chunk() {
        let text = "a".repeat(TEXT_CHUNK_MAX);
        assert_eq!(split_chunks(&text, TEXT_CHUNK_MAX).len(), 1);
    }

    #[test]
    fn splits_on_newline() {
        let line = "a".repeat(3000);
        let text = format!("{line}\n{line}");
        let chunks = split_chunks(&text, TEXT_CHUNK_MAX);
        assert_eq!(chunks, vec![line.clone(), line]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 'ñ' is two bytes; 3000 of them fit in one message
        let text = "ñ".repeat(3000);
        assert_eq!(split_chunks(&text, TEXT_CHUNK_MAX).len(), 1);

        let long = "ñ".repeat(5000);
        let chunks = split_chunks(&long, TEXT_CHUNK_MAX);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), TEXT_CHUNK_MAX);
        assert_eq!(chunks[1].chars().count(), 5000 - TEXT_CHUNK_MAX);
    }

    #[test]
    fn every_chunk_fits() {
        let text = "palabra ".repeat(2000);
        for chunk in split_chunks(&text, 100) {
            assert!(chunk.chars().count() <= 100);
        }
    }
}
