//! Sliding-window text chunker that derives a `Citation` per chunk from a position map.
//!
//! Grounded on this crate's existing `processing::chunker::TextChunker`: the same
//! UTF-8-safe boundary snapping and ranked break-point search (paragraph, `". "`,
//! `".\n"`, `"\n"`, `" "`), generalized to carry page/time position metadata instead of
//! markdown-heading extraction.

use crate::types::{Citation, MediaType};

/// Source-position metadata for a whole document, used to derive per-chunk citations.
#[derive(Debug, Clone)]
pub enum PositionMap {
    /// Ordered, non-overlapping page spans covering the document's character range.
    Pages(Vec<PageSpan>),
    /// Ordered, non-overlapping time segments covering the document's character range.
    Audio(Vec<TimeSegment>),
    /// No position metadata available for this source.
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct PageSpan {
    pub page: u32,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkSpan {
    pub text: String,
    pub index: u32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub citation: Citation,
}

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self { chunk_size, chunk_overlap, min_chunk_size }
    }

    /// Split `text` into overlapping spans and attach a `Citation` derived from
    /// `position_map`, scoped to the position kind `media_type` actually supports
    /// (paginated formats get page citations, everything else gets time citations).
    /// Empty or whitespace-only input yields an empty list. A tail fragment shorter
    /// than `min_chunk_size` is merged into the previous chunk rather than dropped, so
    /// no non-whitespace content is silently lost.
    pub fn chunk(&self, text: &str, media_type: MediaType, position_map: &PositionMap) -> Vec<ChunkSpan> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        if text.len() <= self.chunk_size {
            let citation = derive_citation(media_type, position_map, 0, text.len());
            return vec![ChunkSpan { text: text.to_string(), index: 0, start_offset: 0, end_offset: text.len(), citation }];
        }

        let mut raw_spans: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let raw_end = (start + self.chunk_size).min(text.len());
            let end = snap_to_char_boundary(text, raw_end);
            let actual_end = if end < text.len() { find_break_point(text, start, end) } else { end };

            raw_spans.push((start, actual_end));

            let step = if actual_end - start > self.chunk_overlap {
                actual_end - start - self.chunk_overlap
            } else {
                actual_end - start
            };
            let raw_next = start + step;
            start = snap_to_char_boundary(text, raw_next);
            if start >= text.len() {
                break;
            }
        }

        // Merge a too-small tail fragment into the previous span rather than dropping it.
        if raw_spans.len() > 1 {
            let (last_start, last_end) = *raw_spans.last().unwrap();
            if last_end - last_start < self.min_chunk_size {
                raw_spans.pop();
                let (prev_start, _) = *raw_spans.last().unwrap();
                raw_spans.pop();
                raw_spans.push((prev_start, last_end));
            }
        }

        raw_spans
            .into_iter()
            .enumerate()
            .map(|(i, (s, e))| ChunkSpan {
                text: text[s..e].to_string(),
                index: i as u32,
                start_offset: s,
                end_offset: e,
                citation: derive_citation(media_type, position_map, s, e),
            })
            .collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1750, 200, 100)
    }
}

/// Paginated media never gets a time citation and non-paginated media never gets a
/// page citation, even if the wrong `PositionMap` variant was built for it upstream.
fn derive_citation(media_type: MediaType, position_map: &PositionMap, start: usize, end: usize) -> Citation {
    match position_map {
        PositionMap::None => Citation::None,
        PositionMap::Pages(spans) => {
            if !media_type.is_paginated() {
                return Citation::None;
            }
            let mut pages: Vec<u32> = spans
                .iter()
                .filter(|s| s.start < end && s.end > start)
                .map(|s| s.page)
                .collect();
            pages.sort_unstable();
            pages.dedup();
            if pages.is_empty() {
                Citation::None
            } else {
                Citation::Page { pages }
            }
        }
        PositionMap::Audio(segments) => {
            if media_type.is_paginated() {
                return Citation::None;
            }
            let overlapping: Vec<&TimeSegment> =
                segments.iter().filter(|s| s.start < end && s.end > start).collect();
            if overlapping.is_empty() {
                return Citation::None;
            }
            let start_time = overlapping.iter().map(|s| s.start_time).fold(f64::INFINITY, f64::min);
            let end_time = overlapping.iter().map(|s| s.end_time).fold(f64::NEG_INFINITY, f64::max);
            Citation::Time { start: start_time, end: end_time, label: format_time_range(start_time, end_time) }
        }
    }
}

fn format_time_range(start: f64, end: f64) -> String {
    format!("{}-{}", format_timestamp(start), format_timestamp(end))
}

fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn find_break_point(text: &str, start: usize, preferred_end: usize) -> usize {
    let raw_search_start = if preferred_end > 200 { preferred_end - 200 } else { start };
    let search_start = snap_to_char_boundary(text, raw_search_start);
    let safe_end = snap_to_char_boundary(text, preferred_end);

    if search_start >= safe_end {
        return safe_end;
    }

    let search_region = &text[search_start..safe_end];
    if let Some(pos) = search_region.rfind("\n\n") {
        return search_start + pos + 2;
    }
    if let Some(pos) = search_region.rfind(". ") {
        return search_start + pos + 2;
    }
    if let Some(pos) = search_region.rfind(".\n") {
        return search_start + pos + 2;
    }
    if let Some(pos) = search_region.rfind('\n') {
        return search_start + pos + 1;
    }
    if let Some(pos) = search_region.rfind(' ') {
        return search_start + pos + 1;
    }
    safe_end
}

fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}
