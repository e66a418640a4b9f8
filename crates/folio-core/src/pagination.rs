//! Screen and location segmentation for reflowable text.
//!
//! Screens approximate what fits in the viewport for the chosen font size and
//! keep paragraphs intact. Locations are the fixed-size units the position
//! index is built from and do not depend on typography at all.

/// Minimum allowed font size (points).
pub const MIN_FONT_SIZE: u32 = 12;
/// Maximum allowed font size (points).
pub const MAX_FONT_SIZE: u32 = 36;
/// Minimum lines on one screen.
pub const MIN_LINES_PER_SCREEN: usize = 8;
/// Maximum lines on one screen.
pub const MAX_LINES_PER_SCREEN: usize = 80;

/// Rough character capacity of one screen.
pub fn chars_per_screen(font_size: u32, lines_per_screen: usize) -> usize {
    let normalized = font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE) as f32;

    // Scale line width with font size; lines are configured directly.
    let chars_per_line = (80.0 * (16.0 / normalized))
        .round()
        .clamp(30.0, 120.0) as usize;
    let lines = lines_per_screen.clamp(MIN_LINES_PER_SCREEN, MAX_LINES_PER_SCREEN);
    chars_per_line.saturating_mul(lines).max(1)
}

/// Byte offsets where each screen of `text` starts. Always contains `0`.
///
/// A paragraph longer than a screen still occupies a single screen; the
/// renderer never splits inside a paragraph.
pub fn screen_starts(text: &str, chars_per_screen: usize) -> Vec<usize> {
    let mut starts = vec![0];
    let mut current_len = 0usize;

    for (offset, para) in paragraph_spans(text) {
        let para_len = para.chars().count();
        // Paragraph plus a separating blank line if not first on the screen.
        let separator_len = if current_len == 0 { 0 } else { 2 };
        let prospective_len = current_len + separator_len + para_len;

        if current_len > 0 && prospective_len > chars_per_screen {
            starts.push(offset);
            current_len = para_len;
        } else {
            current_len = prospective_len;
        }
    }

    starts
}

/// Byte offsets of location boundaries, one every `chars_per_location`
/// characters, moved forward to the next whitespace so words stay whole.
/// Runs without whitespace (CJK, long unbroken tokens) are cut at a char
/// boundary once they reach a quarter past the unit.
pub fn location_starts(text: &str, chars_per_location: usize) -> Vec<usize> {
    let unit = chars_per_location.max(1);
    let hard_limit = unit + unit / 4;
    let mut starts = Vec::new();
    if text.trim().is_empty() {
        return starts;
    }
    starts.push(0);

    let mut since_start = 0usize;
    let mut want_break = false;
    for (offset, ch) in text.char_indices() {
        if want_break && ch.is_whitespace() {
            let next = offset + ch.len_utf8();
            if next < text.len() {
                starts.push(next);
            }
            since_start = 0;
            want_break = false;
            continue;
        }
        if since_start >= hard_limit {
            starts.push(offset);
            since_start = 0;
            want_break = false;
        }
        since_start += 1;
        if since_start >= unit {
            want_break = true;
        }
    }

    starts
}

/// Paragraphs separated by blank lines, with their starting byte offsets.
fn paragraph_spans(text: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0usize;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(begin) = start.take() {
                spans.push((begin, &text[begin..end]));
            }
        } else {
            if start.is_none() {
                start = Some(offset);
            }
            end = offset + line.trim_end_matches(['\n', '\r']).len();
        }
        offset += line.len();
    }

    if let Some(begin) = start {
        spans.push((begin, &text[begin..end]));
    }

    spans
}
