//! Text preprocessing for speech synthesis.
//!
//! Assistant replies arrive as markdown; the speech engine must never be
//! asked to vocalise formatting tokens. [`clean_for_speech`] reduces a reply
//! to plain speakable text: code fences become a short spoken marker, inline
//! markers are unwrapped, links collapse to their link text.

/// Strip markdown from a reply, producing plain text for the TTS service.
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;
    let mut fence_announced = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            if !in_fence {
                fence_announced = false;
            }
            continue;
        }
        if in_fence {
            if !fence_announced {
                push_spaced(&mut out, "Code omitted.");
                fence_announced = true;
            }
            continue;
        }

        if is_rule(trimmed) {
            continue;
        }

        let body = strip_block_prefix(trimmed);
        let cleaned = strip_inline(body);
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            push_spaced(&mut out, cleaned);
        }
    }

    collapse_spaces(&out)
}

fn push_spaced(out: &mut String, text: &str) {
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(text);
}

/// Horizontal rule: three or more of the same `-` / `*` / `_`.
fn is_rule(line: &str) -> bool {
    let marks: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    marks.len() >= 3
        && (marks.iter().all(|&c| c == '-')
            || marks.iter().all(|&c| c == '*')
            || marks.iter().all(|&c| c == '_'))
}

/// Drop leading block markers: heading hashes, blockquote arrows, bullet and
/// numbered list markers.
fn strip_block_prefix(line: &str) -> &str {
    let mut rest = line;

    while let Some(after) = rest.strip_prefix('>') {
        rest = after.trim_start();
    }

    if rest.starts_with('#') {
        rest = rest.trim_start_matches('#').trim_start();
    }

    for marker in ["- ", "* ", "+ "] {
        if let Some(after) = rest.strip_prefix(marker) {
            return after;
        }
    }

    // Numbered list: digits then ". " or ") "
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let tail = &rest[digits..];
        if let Some(after) = tail.strip_prefix(". ").or_else(|| tail.strip_prefix(") ")) {
            return after;
        }
    }

    rest
}

/// One pass over a line: images to alt text, links to link text, inline code
/// unwrapped, emphasis markers dropped, HTML tags removed.
fn strip_inline(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            // Image ![alt](url) — speak the alt text.
            '!' if chars.get(i + 1) == Some(&'[') => {
                if let Some((label, next)) = take_bracketed(&chars, i + 1) {
                    if !label.is_empty() {
                        out.push_str("image: ");
                        out.push_str(&label);
                    }
                    i = next;
                } else {
                    out.push('!');
                    i += 1;
                }
            }

            // Link [text](url) — keep only the text.
            '[' => {
                if let Some((label, next)) = take_bracketed(&chars, i) {
                    out.push_str(&label);
                    i = next;
                } else {
                    out.push('[');
                    i += 1;
                }
            }

            // Inline code `…` — unwrap.
            '`' => {
                if let Some(close) = chars[i + 1..].iter().position(|&c| c == '`') {
                    out.extend(&chars[i + 1..i + 1 + close]);
                    i += close + 2;
                } else {
                    i += 1;
                }
            }

            // Emphasis and strikethrough markers.
            '*' | '~' => i += 1,
            '_' if is_emphasis_underscore(&chars, i) => i += 1,

            // HTML tag — skip to the closing angle bracket.
            '<' => match chars[i..].iter().position(|&c| c == '>') {
                Some(end) => i += end + 1,
                None => {
                    out.push('<');
                    i += 1;
                }
            },

            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Parse `[label](url)` starting at the `[`; returns the label and the index
/// just past the closing `)`.
fn take_bracketed(chars: &[char], open: usize) -> Option<(String, usize)> {
    let close = open + 1 + chars[open + 1..].iter().position(|&c| c == ']')?;
    if chars.get(close + 1) != Some(&'(') {
        return None;
    }
    let paren = close + 2 + chars[close + 2..].iter().position(|&c| c == ')')?;
    Some((chars[open + 1..close].iter().collect(), paren + 1))
}

/// Underscores are emphasis only next to word characters; a lone `_` inside
/// an identifier-looking token is left alone.
fn is_emphasis_underscore(chars: &[char], i: usize) -> bool {
    let prev_word = i > 0 && chars[i - 1].is_alphanumeric();
    let next_word = chars.get(i + 1).is_some_and(|c| c.is_alphanumeric());
    !(prev_word && next_word)
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_italic_and_code_are_unwrapped() {
        assert_eq!(
            clean_for_speech("**Bold** and *italic* and `inline code`."),
            "Bold and italic and inline code."
        );
    }

    #[test]
    fn links_reduce_to_link_text() {
        assert_eq!(
            clean_for_speech("See [my portfolio](https://example.com) for more."),
            "See my portfolio for more."
        );
    }

    #[test]
    fn images_reduce_to_alt_text() {
        assert_eq!(
            clean_for_speech("Look: ![a sunset](sunset.png)"),
            "Look: image: a sunset"
        );
    }

    #[test]
    fn heading_hashes_are_dropped() {
        assert_eq!(clean_for_speech("## About me\nHi."), "About me Hi.");
    }

    #[test]
    fn fenced_code_becomes_marker() {
        let input = "Here:\n```rust\nfn main() {}\nlet x = 1;\n```\nDone.";
        assert_eq!(clean_for_speech(input), "Here: Code omitted. Done.");
    }

    #[test]
    fn lists_and_quotes_lose_their_markers() {
        let input = "- first\n- second\n> quoted\n1. numbered";
        assert_eq!(clean_for_speech(input), "first second quoted numbered");
    }

    #[test]
    fn horizontal_rules_vanish() {
        assert_eq!(clean_for_speech("above\n---\nbelow"), "above below");
    }

    #[test]
    fn html_tags_are_removed() {
        assert_eq!(clean_for_speech("a <br> b <span>c</span>"), "a b c");
    }

    #[test]
    fn snake_case_identifiers_keep_their_underscores() {
        assert_eq!(clean_for_speech("call start_capture now"), "call start_capture now");
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(clean_for_speech("a   b\n\n\nc"), "a b c");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(
            clean_for_speech("Hello there, how can I help?"),
            "Hello there, how can I help?"
        );
    }
}
