//! The three chunking strategies. Each returns raw `(start, end)` char ranges into the
//! normalised text; `lib.rs` turns those into validated chunks.

use crate::headings::HeadingEvent;

/// Sentence-ending punctuation recognised by the fixed-size cut-shift and the sentence
/// splitter.
pub const SENTENCE_PUNCTUATION: &[char] = &['.', '!', '?', '。', '！', '？', '…', '」', '』', '】', '）'];

#[derive(Debug, Clone, Copy)]
pub struct FixedSizeOptions {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for FixedSizeOptions {
    fn default() -> Self {
        Self { chunk_size: 500, overlap: 50 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SentenceOptions {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for SentenceOptions {
    fn default() -> Self {
        Self { min_len: 10, max_len: 500 }
    }
}

pub(crate) struct RawSegment {
    pub start: usize,
    pub end: usize,
}

/// Markdown strategy: each heading opens a new chunk running to the next heading (or end
/// of document); a preamble before the first heading becomes its own chunk.
pub(crate) fn split_markdown(chars: &[char], headings: &[HeadingEvent]) -> Vec<RawSegment> {
    let mut bounds: Vec<usize> = headings.iter().map(|h| h.offset).collect();
    bounds.push(chars.len());

    let mut segments = Vec::new();
    if bounds.first().copied() != Some(0) {
        segments.push(RawSegment { start: 0, end: *bounds.first().unwrap_or(&chars.len()) });
    }
    for w in bounds.windows(2) {
        segments.push(RawSegment { start: w[0], end: w[1] });
    }
    segments
}

/// Fixed-size strategy: slide by `chunk_size - overlap`; shift each hard cut within a
/// ±30-char window to the nearest sentence terminator or whitespace, never crossing
/// `start + 1`.
pub(crate) fn split_fixed_size(chars: &[char], opts: &FixedSizeOptions) -> Vec<RawSegment> {
    let n = chars.len();
    if n == 0 {
        return Vec::new();
    }
    let step = opts.chunk_size.saturating_sub(opts.overlap).max(1);
    let mut segments = Vec::new();
    let mut start = 0usize;
    loop {
        let target_end = (start + opts.chunk_size).min(n);
        let end = if target_end >= n {
            n
        } else {
            shift_cut(chars, target_end, start, n)
        };
        segments.push(RawSegment { start, end });
        if end >= n {
            break;
        }
        if start + step <= start {
            break; // guard against non-advancing loops
        }
        start += step;
        if start >= n {
            break;
        }
    }
    segments
}

fn shift_cut(chars: &[char], target: usize, start: usize, n: usize) -> usize {
    let lo = target.saturating_sub(30).max(start + 1);
    let hi = (target + 30).min(n);
    let mut best: Option<usize> = None;
    let mut best_dist = usize::MAX;
    for idx in lo..hi {
        let ch = chars[idx];
        let is_boundary = SENTENCE_PUNCTUATION.contains(&ch) || ch.is_whitespace();
        if !is_boundary {
            continue;
        }
        let cut = idx + 1;
        if cut <= start + 1 || cut > n {
            continue;
        }
        let dist = target.abs_diff(cut);
        if dist < best_dist {
            best_dist = dist;
            best = Some(cut);
        }
    }
    best.unwrap_or(target)
}

/// Sentence strategy: accumulate sentences until `max_len` would be exceeded, then flush;
/// the final non-terminated tail (if any) is emitted as its own piece.
pub(crate) fn split_sentences(chars: &[char], opts: &SentenceOptions) -> Vec<RawSegment> {
    let sentence_bounds = sentence_boundaries(chars);
    if sentence_bounds.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut buf_start = 0usize;
    let mut cur_end = 0usize;
    for (_, s_end) in &sentence_bounds {
        let prospective_len = s_end - buf_start;
        if cur_end > buf_start && prospective_len > opts.max_len {
            segments.push(RawSegment { start: buf_start, end: cur_end });
            buf_start = cur_end;
        }
        cur_end = *s_end;
    }
    if cur_end > buf_start {
        segments.push(RawSegment { start: buf_start, end: cur_end });
    }
    segments
}

fn sentence_boundaries(chars: &[char]) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        if SENTENCE_PUNCTUATION.contains(&chars[i]) {
            let mut j = i + 1;
            while j < chars.len() && SENTENCE_PUNCTUATION.contains(&chars[j]) {
                j += 1;
            }
            bounds.push((start, j));
            start = j;
            i = j;
        } else {
            i += 1;
        }
    }
    if start < chars.len() {
        bounds.push((start, chars.len()));
    }
    bounds
}
