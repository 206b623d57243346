//! Caps on how much text a tool result may put back into a conversation.

/// Which part of an oversized output survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Two fifths from the start and the rest from the end.
    HeadTail,
    /// Only the end.
    Tail,
}

/// Byte offset of the `n`th character of `s`, or `s.len()` past the end.
fn char_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Shortens `output` to `max_chars` characters plus an elision marker.
/// Lengths are counted in characters so a code point is never split.
pub fn truncate_output(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let dropped = total - max_chars;

    match mode {
        TruncationMode::HeadTail => {
            let keep_head = max_chars * 2 / 5;
            let head_end = char_offset(output, keep_head);
            let tail_start = char_offset(output, keep_head + dropped);
            format!(
                "{}\n[... {} characters elided ...]\n{}",
                &output[..head_end],
                dropped,
                &output[tail_start..]
            )
        }
        TruncationMode::Tail => format!(
            "[... {} leading characters elided ...]\n{}",
            dropped,
            &output[char_offset(output, dropped)..]
        ),
    }
}
