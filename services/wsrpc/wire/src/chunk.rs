//! Frame splitting for concatenated JSON messages.
//!
//! A single socket frame may carry several JSON documents back to back, or
//! only part of one. [`split_frames`] cuts a frame into candidate message
//! fragments at object/array boundaries; fragments that do not parse on their
//! own are stitched together by the session's reassembler.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker inserted between adjacent messages before splitting
pub const FRAME_DELIMITER: &str = "|--|";

// Boundary rewrites, applied in order. Each allows one optional CR or LF
// between the closing and opening delimiters.
static BOUNDARIES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\}[\n\r]?\{", "}|--|{"),
        (r"\}\][\n\r]?\[\{", "}]|--|[{"),
        (r"\}[\n\r]?\[\{", "}|--|[{"),
        (r"\}\][\n\r]?\{", "}]|--|{"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
        Ok(regex) => Some((regex, replacement)),
        Err(e) => {
            tracing::error!("Invalid boundary pattern {}: {}", pattern, e);
            None
        }
    })
    .collect()
});

/// Split raw frame text into message fragments.
///
/// Always returns at least one element; text without any boundary comes
/// back unchanged as a single fragment.
pub fn split_frames(data: &str) -> Vec<String> {
    let mut marked = data.to_string();
    for (regex, replacement) in BOUNDARIES.iter() {
        if regex.is_match(&marked) {
            marked = regex.replace_all(&marked, *replacement).into_owned();
        }
    }

    marked.split(FRAME_DELIMITER).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_message_unchanged() {
        let data = r#"{"id":1,"result":"0x1"}"#;
        assert_eq!(split_frames(data), vec![data.to_string()]);
    }

    #[test]
    fn test_adjacent_objects() {
        let parts = split_frames(r#"{"id":1,"result":1}{"id":2,"result":2}"#);
        assert_eq!(parts, vec![r#"{"id":1,"result":1}"#, r#"{"id":2,"result":2}"#]);
    }

    #[test]
    fn test_line_break_between_objects() {
        let lf = split_frames("{\"id\":1}\n{\"id\":2}");
        let cr = split_frames("{\"id\":1}\r{\"id\":2}");
        assert_eq!(lf, vec![r#"{"id":1}"#, r#"{"id":2}"#]);
        assert_eq!(cr, lf);
    }

    #[test]
    fn test_array_boundaries() {
        assert_eq!(
            split_frames(r#"[{"id":1}][{"id":2}]"#),
            vec![r#"[{"id":1}]"#, r#"[{"id":2}]"#]
        );
        assert_eq!(
            split_frames(r#"{"id":1}[{"id":2}]"#),
            vec![r#"{"id":1}"#, r#"[{"id":2}]"#]
        );
        assert_eq!(
            split_frames(r#"[{"id":1}]{"id":2}"#),
            vec![r#"[{"id":1}]"#, r#"{"id":2}"#]
        );
    }

    #[test]
    fn test_partial_fragments_survive() {
        let parts = split_frames(r#"{"id":1,"res"#);
        assert_eq!(parts, vec![r#"{"id":1,"res"#]);

        let parts = split_frames(r#"ult":1}{"id":2"#);
        assert_eq!(parts, vec![r#"ult":1}"#, r#"{"id":2"#]);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(split_frames(""), vec![String::new()]);
    }
}
