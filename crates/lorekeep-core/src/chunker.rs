//! Structure-aware text chunking for embedding and retrieval.
//!
//! The primary strategy scans markdown for candidate break points (headings,
//! thematic breaks, list starts, paragraph breaks, bare newlines), scores them
//! by structural significance, and cuts each window at the best-scoring break
//! near the ideal cut point. Fenced code blocks are detected up front and are
//! never split across chunks: cuts snap to fence boundaries and the overlap is
//! shortened when a chunk carries a fence.
//!
//! A secondary delimiter strategy splits on a chosen boundary (paragraph,
//! heading, or a caller-supplied separator) and greedily packs segments into
//! size-bounded chunks with a trailing-overlap carry-over.
//!
//! Pure functions, no I/O.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::defaults;

/// One emitted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSplit {
    /// 0-based position within this split pass.
    pub index: i32,
    /// Trimmed chunk text.
    pub text: String,
    /// Estimated token count: ⌈chars / 4⌉.
    pub token_count: i32,
    /// Hex SHA-256 of the trimmed text.
    pub content_hash: String,
}

/// Splitting strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Structural break-point scoring (default).
    #[default]
    Heuristic,
    /// Split on paragraph breaks, then pack.
    Paragraph,
    /// Split before heading lines, then pack.
    Heading,
    /// Split on a caller-supplied separator, then pack.
    Separator,
}

impl ChunkStrategy {
    pub fn parse(s: &str) -> Self {
        match s {
            "paragraph" => Self::Paragraph,
            "heading" => Self::Heading,
            "separator" => Self::Separator,
            _ => Self::Heuristic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::Separator => "separator",
        }
    }
}

// Break-point scores by structural significance.
const SCORE_HEADING: f32 = 1.0;
const SCORE_RULE: f32 = 0.8;
const SCORE_LIST: f32 = 0.6;
const SCORE_BLANK: f32 = 0.45;
const SCORE_NEWLINE: f32 = 0.15;

/// A candidate break position (byte offset of a line start) with its score.
#[derive(Debug, Clone, Copy)]
struct BreakPoint {
    pos: usize,
    score: f32,
}

/// A fenced code region: byte range from the opening fence line start to the
/// end of the closing fence line (or end of text when unterminated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FenceRegion {
    start: usize,
    end: usize,
}

impl FenceRegion {
    /// A position strictly inside the region. Positions at either boundary are
    /// legal cut points.
    fn contains(&self, pos: usize) -> bool {
        pos > self.start && pos < self.end
    }
}

fn is_fence_marker(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn is_thematic_break(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 3
        && (t.chars().all(|c| c == '-')
            || t.chars().all(|c| c == '*')
            || t.chars().all(|c| c == '_'))
}

fn is_list_start(line: &str) -> bool {
    let t = line.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return true;
    }
    // Numbered list: digits followed by '.' or ')' and a space.
    let digits: String = t.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    let rest = &t[digits.len()..];
    rest.starts_with(". ") || rest.starts_with(") ")
}

/// Find UTF-8 safe boundary at or before the given position.
fn find_char_boundary_before(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Find UTF-8 safe boundary at or after the given position.
fn find_char_boundary_after(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Scan line starts once, scoring each as a break candidate.
fn scan_break_points(text: &str) -> Vec<BreakPoint> {
    let mut points = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if offset > 0 {
            let score = if line.starts_with('#') {
                SCORE_HEADING
            } else if is_thematic_break(line) {
                SCORE_RULE
            } else if is_list_start(line) {
                SCORE_LIST
            } else if line.trim().is_empty() {
                SCORE_BLANK
            } else {
                SCORE_NEWLINE
            };
            points.push(BreakPoint { pos: offset, score });
        }
        offset += line.len();
    }
    points
}

/// Pair fence markers into regions; an unterminated opening fence extends to
/// the end of the text.
fn scan_fences(text: &str) -> Vec<FenceRegion> {
    let mut regions = Vec::new();
    let mut open: Option<usize> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if is_fence_marker(line) {
            match open.take() {
                None => open = Some(offset),
                Some(start) => regions.push(FenceRegion {
                    start,
                    end: offset + line.len(),
                }),
            }
        }
        offset += line.len();
    }
    if let Some(start) = open {
        regions.push(FenceRegion {
            start,
            end: text.len(),
        });
    }
    regions
}

fn fence_containing(fences: &[FenceRegion], pos: usize) -> Option<FenceRegion> {
    fences.iter().copied().find(|f| f.contains(pos))
}

/// Pick the best break in `(ideal - window, ideal]`, discounting candidates
/// further from the ideal cut by a quadratic distance penalty and skipping any
/// that fall inside a fence.
fn best_break(
    breaks: &[BreakPoint],
    fences: &[FenceRegion],
    ideal: usize,
    window: usize,
    cursor: usize,
) -> Option<usize> {
    let floor = ideal.saturating_sub(window);
    let mut best: Option<(usize, f32)> = None;
    for bp in breaks {
        if bp.pos <= cursor || bp.pos <= floor || bp.pos > ideal {
            continue;
        }
        if fence_containing(fences, bp.pos).is_some() {
            continue;
        }
        let dist = (ideal - bp.pos) as f32 / window.max(1) as f32;
        let effective = bp.score * (1.0 - dist * dist);
        if effective <= 0.0 {
            continue;
        }
        match best {
            Some((_, s)) if s >= effective => {}
            _ => best = Some((bp.pos, effective)),
        }
    }
    best.map(|(pos, _)| pos)
}

fn make_chunk(index: i32, text: &str) -> ChunkSplit {
    let trimmed = text.trim();
    let chars = trimmed.chars().count();
    ChunkSplit {
        index,
        text: trimmed.to_string(),
        token_count: chars.div_ceil(4) as i32,
        content_hash: hex::encode(Sha256::digest(trimmed.as_bytes())),
    }
}

/// Split `text` into overlapping, structurally-aligned chunks.
///
/// `target_size` is clamped to at least [`defaults::CHUNK_MIN_TARGET`];
/// `overlap` is clamped to `[0, target_size - 1]`. Empty or whitespace-only
/// input yields an empty list. The cursor advances by at least one character
/// per iteration, so the walk terminates on any input.
pub fn split(text: &str, target_size: usize, overlap: usize) -> Vec<ChunkSplit> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let target = target_size.max(defaults::CHUNK_MIN_TARGET);
    let overlap = overlap.min(target - 1);
    let window = target / 4;
    let fence_overlap_cap = target / 10;

    let breaks = scan_break_points(text);
    let fences = scan_fences(text);
    let len = text.len();

    let mut chunks = Vec::new();
    let mut cursor = 0usize;
    let mut index = 0i32;

    while cursor < len {
        if len - cursor <= target {
            // Remaining text fits one window: take it verbatim.
            let chunk = make_chunk(index, &text[cursor..]);
            if !chunk.text.is_empty() {
                chunks.push(chunk);
            }
            break;
        }

        let ideal = find_char_boundary_before(text, cursor + target);
        let mut cut = match fence_containing(&fences, ideal) {
            // Raw cut lands inside a fence: snap to the fence boundary,
            // preferring the start when that still leaves forward progress.
            Some(f) => {
                if f.start > cursor {
                    f.start
                } else {
                    f.end.min(len)
                }
            }
            None => best_break(&breaks, &fences, ideal, window, cursor).unwrap_or(ideal),
        };
        if cut <= cursor {
            cut = find_char_boundary_after(text, cursor + 1).min(len);
        }
        cut = find_char_boundary_after(text, cut).min(len);

        let slice = &text[cursor..cut];
        let chunk = make_chunk(index, slice);
        if !chunk.text.is_empty() {
            chunks.push(chunk);
            index += 1;
        }

        // A chunk carrying a fence keeps only a short overlap so the code
        // block is not re-split into the next chunk.
        let has_fence = slice.contains("```") || slice.contains("~~~");
        let eff_overlap = if has_fence {
            overlap.min(fence_overlap_cap)
        } else {
            overlap
        };

        let mut next = cut.saturating_sub(eff_overlap);
        if let Some(f) = fence_containing(&fences, next) {
            next = f.end.min(len);
        }
        if next <= cursor {
            next = find_char_boundary_after(text, cursor + 1);
        }
        cursor = find_char_boundary_after(text, next);
    }

    chunks
}

/// Split with an explicit strategy. `Heuristic` delegates to [`split`]; the
/// delimiter strategies segment on their boundary and greedily pack segments
/// into chunks bounded by a clamped size with a trailing-overlap carry-over.
pub fn split_with_strategy(
    text: &str,
    strategy: ChunkStrategy,
    size: usize,
    overlap: usize,
    separator: Option<&str>,
) -> Vec<ChunkSplit> {
    if strategy == ChunkStrategy::Heuristic {
        return split(text, size, overlap);
    }

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let size = size.clamp(defaults::PACKED_MIN_SIZE, defaults::PACKED_MAX_SIZE);
    let overlap = overlap.min(size - 1);

    let segments: Vec<&str> = match strategy {
        ChunkStrategy::Paragraph => {
            // A blank line with stray whitespace still separates paragraphs.
            let para_regex = Regex::new(r"\n\s*\n|\r\n\s*\r\n").unwrap();
            para_regex.split(text).collect()
        }
        ChunkStrategy::Heading => split_before_headings(text),
        ChunkStrategy::Separator => {
            let sep = separator.filter(|s| !s.is_empty()).unwrap_or("\n\n");
            text.split(sep).collect()
        }
        ChunkStrategy::Heuristic => unreachable!(),
    };

    let mut chunks: Vec<ChunkSplit> = Vec::new();
    let mut buffer = String::new();
    let mut index = 0i32;

    let mut flush = |buffer: &mut String, index: &mut i32, chunks: &mut Vec<ChunkSplit>| {
        let chunk = make_chunk(*index, buffer);
        if !chunk.text.is_empty() {
            chunks.push(chunk);
            *index += 1;
        }
        // Trailing overlap carried into the next chunk.
        let keep_from = find_char_boundary_after(buffer, buffer.len().saturating_sub(overlap));
        let carry = buffer[keep_from..].to_string();
        buffer.clear();
        buffer.push_str(&carry);
    };

    for segment in segments {
        let segment = segment.trim_end();
        if segment.trim().is_empty() {
            continue;
        }
        if !buffer.is_empty() && buffer.len() + segment.len() + 1 > size {
            flush(&mut buffer, &mut index, &mut chunks);
        }
        if segment.len() > size {
            // Oversized segment: hard-split into size-bounded pieces.
            if !buffer.is_empty() {
                flush(&mut buffer, &mut index, &mut chunks);
                buffer.clear();
            }
            let mut offset = 0;
            while offset < segment.len() {
                let end = find_char_boundary_before(segment, (offset + size).min(segment.len()));
                let end = if end <= offset { segment.len() } else { end };
                buffer.push_str(&segment[offset..end]);
                if end < segment.len() {
                    flush(&mut buffer, &mut index, &mut chunks);
                }
                offset = end;
            }
        } else {
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(segment);
        }
    }

    let tail = make_chunk(index, &buffer);
    if !tail.text.is_empty() {
        chunks.push(tail);
    }

    chunks
}

/// Split text into segments that each begin at a heading line.
fn split_before_headings(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut seg_start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if offset > 0 && line.starts_with('#') {
            segments.push(&text[seg_start..offset]);
            seg_start = offset;
        }
        offset += line.len();
    }
    segments.push(&text[seg_start..]);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_fence_markers(text: &str) -> usize {
        text.lines().filter(|l| is_fence_marker(l)).count()
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(split("", 1000, 200).is_empty());
        assert!(split("   \n\t \n ", 1000, 200).is_empty());
    }

    #[test]
    fn test_short_input_yields_single_verbatim_chunk() {
        let chunks = split("hello world", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].token_count, 3); // ceil(11 / 4)
    }

    #[test]
    fn test_uniform_2200_chars_size_1000_overlap_200() {
        let text = "a".repeat(2200);
        let chunks = split(&text, 1000, 200);
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(chunks[0].text.len() >= 900);
        assert!(chunks[1].text.len() >= 900);
    }

    #[test]
    fn test_target_size_clamped_to_minimum() {
        let text = "b".repeat(250);
        // Requested size 10 is clamped to 100.
        let chunks = split(&text, 10, 0);
        assert!(chunks.iter().all(|c| c.text.len() <= 100));
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn test_overlap_clamped_below_target() {
        // overlap >= target would stall the cursor; clamping keeps progress.
        let text = "c".repeat(500);
        let chunks = split(&text, 100, 5000);
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 500);
    }

    #[test]
    fn test_prefers_heading_break_near_ideal_cut() {
        let mut text = String::new();
        text.push_str(&"alpha beta gamma delta.\n".repeat(35)); // ~840 bytes
        text.push_str("# Section Two\n");
        text.push_str(&"epsilon zeta eta theta.\n".repeat(40));
        let chunks = split(&text, 1000, 0);
        assert!(chunks.len() >= 2);
        // The second chunk should begin at the heading, not mid-sentence.
        assert!(
            chunks[1].text.starts_with("# Section Two"),
            "chunk 1 starts with: {:?}",
            &chunks[1].text[..40.min(chunks[1].text.len())]
        );
    }

    #[test]
    fn test_fences_never_split() {
        let mut text = String::new();
        text.push_str(&"prose line before the block.\n".repeat(30));
        text.push_str("```rust\n");
        text.push_str(&"let x = 42; // code line\n".repeat(20));
        text.push_str("```\n");
        text.push_str(&"prose line after the block.\n".repeat(30));
        let chunks = split(&text, 1000, 200);
        for chunk in &chunks {
            assert_eq!(
                count_fence_markers(&chunk.text) % 2,
                0,
                "fence split across chunks: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn test_unterminated_fence_extends_to_end() {
        let mut text = String::new();
        text.push_str(&"prose before.\n".repeat(40));
        text.push_str("```\n");
        text.push_str(&"code without a closing fence\n".repeat(30));
        let fences = scan_fences(&text);
        assert_eq!(fences.len(), 1);
        assert_eq!(fences[0].end, text.len());
        // Must still terminate.
        let chunks = split(&text, 500, 100);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_all_fence_input_terminates() {
        let mut text = String::from("```\n");
        text.push_str(&"x\n".repeat(2000));
        text.push_str("```\n");
        let chunks = split(&text, 200, 50);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_iteration_bound() {
        // At most ceil(len / (size - overlap)) + 1 chunks for break-free text.
        let text = "d".repeat(10_000);
        let (size, overlap) = (500, 100);
        let chunks = split(&text, size, overlap);
        let bound = text.len().div_ceil(size - overlap) + 1;
        assert!(
            chunks.len() <= bound,
            "{} chunks exceeds bound {}",
            chunks.len(),
            bound
        );
    }

    #[test]
    fn test_no_text_dropped() {
        let lines: Vec<String> = (0..120).map(|i| format!("unique line {i} content")).collect();
        let text = lines.join("\n");
        let chunks = split(&text, 600, 100);
        for line in &lines {
            assert!(
                chunks.iter().any(|c| c.text.contains(line.as_str())),
                "dropped: {line}"
            );
        }
    }

    #[test]
    fn test_overlap_repeats_trailing_text() {
        let text = "word ".repeat(500); // 2500 bytes, break-free
        let chunks = split(text.trim(), 1000, 200);
        assert!(chunks.len() >= 2);
        // The tail of chunk 0 reappears at the head of chunk 1.
        let tail: String = chunks[0].text.chars().rev().take(50).collect();
        let tail: String = tail.chars().rev().collect();
        assert!(chunks[1].text.contains(tail.trim()));
    }

    #[test]
    fn test_content_hash_is_sha256_of_trimmed_text() {
        let chunks = split("hello", 1000, 0);
        let expected = hex::encode(Sha256::digest(b"hello"));
        assert_eq!(chunks[0].content_hash, expected);
    }

    #[test]
    fn test_multibyte_input_cuts_on_char_boundaries() {
        let text = "héllo wörld ünïcode ".repeat(100);
        let chunks = split(&text, 300, 50);
        // Would panic on a non-boundary slice; also verify nothing is empty.
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(ChunkStrategy::parse("paragraph"), ChunkStrategy::Paragraph);
        assert_eq!(ChunkStrategy::parse("heading"), ChunkStrategy::Heading);
        assert_eq!(ChunkStrategy::parse("separator"), ChunkStrategy::Separator);
        assert_eq!(ChunkStrategy::parse("anything"), ChunkStrategy::Heuristic);
    }

    #[test]
    fn test_paragraph_strategy_packs_segments() {
        let paragraphs: Vec<String> = (0..20).map(|i| format!("paragraph {i} {}", "x".repeat(80))).collect();
        let text = paragraphs.join("\n\n");
        let chunks = split_with_strategy(&text, ChunkStrategy::Paragraph, 400, 0, None);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.len() <= 400));
        for p in &paragraphs {
            assert!(chunks.iter().any(|c| c.text.contains(p.as_str())));
        }
    }

    #[test]
    fn test_heading_strategy_splits_before_headings() {
        let text = format!(
            "intro text\n# One\n{}\n# Two\n{}",
            "a".repeat(350),
            "b".repeat(350)
        );
        let chunks = split_with_strategy(&text, ChunkStrategy::Heading, 400, 0, None);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.text.contains("# One")));
        assert!(chunks.iter().any(|c| c.text.contains("# Two")));
    }

    #[test]
    fn test_separator_strategy_uses_custom_separator() {
        let text = (0..12)
            .map(|i| format!("record {i} {}", "y".repeat(60)))
            .collect::<Vec<_>>()
            .join("---CUT---");
        let chunks =
            split_with_strategy(&text, ChunkStrategy::Separator, 300, 0, Some("---CUT---"));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.text.contains("---CUT---")));
    }

    #[test]
    fn test_packed_size_clamped() {
        let text = "z".repeat(5000);
        // Requested 50 clamps to 300; requested 10_000 clamps to 2000.
        let small = split_with_strategy(&text, ChunkStrategy::Paragraph, 50, 0, None);
        assert!(small.iter().all(|c| c.text.len() <= 300));
        let large = split_with_strategy(&text, ChunkStrategy::Paragraph, 10_000, 0, None);
        assert!(large.iter().all(|c| c.text.len() <= 2000));
    }

    #[test]
    fn test_packed_strategy_carries_overlap() {
        let paragraphs: Vec<String> = (0..10).map(|i| format!("para{i} {}", "w".repeat(150))).collect();
        let text = paragraphs.join("\n\n");
        let chunks = split_with_strategy(&text, ChunkStrategy::Paragraph, 400, 40, None);
        assert!(chunks.len() >= 2);
        let tail: String = chunks[0].text.chars().rev().take(20).collect();
        let tail: String = tail.chars().rev().collect();
        assert!(chunks[1].text.starts_with(tail.trim_start()));
    }

    #[test]
    fn test_paragraph_break_tolerates_whitespace_and_crlf() {
        let text = "first paragraph\n  \nsecond paragraph\r\n\r\nthird paragraph";
        let chunks = split_with_strategy(text, ChunkStrategy::Paragraph, 2000, 0, None);
        assert_eq!(chunks.len(), 1);
        // All three paragraphs were recognized as separate segments and
        // re-joined with single newlines during packing.
        assert_eq!(
            chunks[0].text,
            "first paragraph\nsecond paragraph\nthird paragraph"
        );
    }

    #[test]
    fn test_blank_strategy_input_empty() {
        assert!(split_with_strategy("  \n ", ChunkStrategy::Paragraph, 500, 0, None).is_empty());
    }

    #[test]
    fn test_break_point_scores_ordered() {
        assert!(SCORE_HEADING > SCORE_RULE);
        assert!(SCORE_RULE > SCORE_LIST);
        assert!(SCORE_LIST > SCORE_BLANK);
        assert!(SCORE_BLANK > SCORE_NEWLINE);
    }

    #[test]
    fn test_list_start_detection() {
        assert!(is_list_start("- item"));
        assert!(is_list_start("* item"));
        assert!(is_list_start("+ item"));
        assert!(is_list_start("12. item"));
        assert!(is_list_start("3) item"));
        assert!(!is_list_start("plain text"));
        assert!(!is_list_start("-not a list"));
    }

    #[test]
    fn test_thematic_break_detection() {
        assert!(is_thematic_break("---"));
        assert!(is_thematic_break("*****"));
        assert!(is_thematic_break("___"));
        assert!(!is_thematic_break("--"));
        assert!(!is_thematic_break("-- x"));
    }
}
