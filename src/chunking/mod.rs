use serde::{Deserialize, Serialize};

use crate::parsing::types::{Chunk, ChunkType, CodeFile};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Semantic,
    LineWindow,
    Hybrid,
}

impl ChunkStrategy {
    pub fn parse(value: &str) -> ChunkStrategy {
        match value {
            "semantic" => ChunkStrategy::Semantic,
            "line_window" => ChunkStrategy::LineWindow,
            _ => ChunkStrategy::Hybrid,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    pub strategy: ChunkStrategy,
    /// Window size for line-window chunks
    pub window: usize,
    /// Overlap between consecutive line-window chunks
    pub overlap: usize,
    /// Context lines captured before a semantic chunk
    pub context_before: usize,
    /// Context lines captured after a semantic chunk
    pub context_after: usize,
    /// Semantic chunks longer than this are subdivided at blank lines
    pub max_chunk_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Hybrid,
            window: 60,
            overlap: 10,
            context_before: 3,
            context_after: 2,
            max_chunk_lines: 120,
        }
    }
}

/// Splits a parsed file into retrieval-sized chunks. Content is carried
/// verbatim; line ranges always stay within the parent file.
#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, file: &CodeFile, content: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut chunks = match self.config.strategy {
            ChunkStrategy::Semantic => self.semantic_chunks(file, &lines),
            ChunkStrategy::LineWindow => self.window_chunks(&lines, 1, lines.len() as u64),
            ChunkStrategy::Hybrid => {
                let mut semantic = self.semantic_chunks(file, &lines);
                let gaps = uncovered_ranges(&semantic, lines.len() as u64);
                for (start, end) in gaps {
                    semantic.extend(self.window_chunks(&lines, start, end));
                }
                semantic.sort_by_key(|c| (c.start_line, c.end_line));
                semantic
            }
        };

        for (seq, chunk) in chunks.iter_mut().enumerate() {
            chunk.id = format!("c{seq:04}");
            chunk.dependencies = dependencies_for(file, &chunk.content);
        }
        chunks
    }

    /// One chunk per function and per class body, with the configured lines
    /// of surrounding context. Oversized chunks split at blank lines.
    fn semantic_chunks(&self, file: &CodeFile, lines: &[&str]) -> Vec<Chunk> {
        let total = lines.len() as u64;
        let mut ranges: Vec<(ChunkType, Option<String>, u64, u64)> = Vec::new();
        for f in &file.functions {
            ranges.push((ChunkType::Function, Some(f.name.clone()), f.start_line, f.end_line));
        }
        for c in &file.classes {
            // skip class bodies already covered by their methods one by one;
            // the class chunk still carries the declaration and fields
            ranges.push((ChunkType::Class, Some(c.name.clone()), c.start_line, c.end_line));
        }
        ranges.sort_by_key(|(_, _, start, end)| (*start, *end));

        let mut chunks = Vec::new();
        for (chunk_type, name, start, end) in ranges {
            let start = start.clamp(1, total);
            let end = end.clamp(start, total);
            for (piece_start, piece_end) in split_range(lines, start, end, self.config.max_chunk_lines) {
                chunks.push(self.build_chunk(
                    lines,
                    chunk_type,
                    name.clone(),
                    piece_start,
                    piece_end,
                ));
            }
        }
        chunks
    }

    /// Fixed-size windows of `window` lines advancing by `window - overlap`.
    fn window_chunks(&self, lines: &[&str], start: u64, end: u64) -> Vec<Chunk> {
        let window = self.config.window.max(1) as u64;
        let step = window.saturating_sub(self.config.overlap as u64).max(1);
        let mut chunks = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            let chunk_end = (cursor + window - 1).min(end);
            chunks.push(self.build_chunk(lines, ChunkType::LineWindow, None, cursor, chunk_end));
            if chunk_end == end {
                break;
            }
            cursor += step;
        }
        chunks
    }

    fn build_chunk(
        &self,
        lines: &[&str],
        chunk_type: ChunkType,
        name: Option<String>,
        start: u64,
        end: u64,
    ) -> Chunk {
        let total = lines.len() as u64;
        let content = lines[(start - 1) as usize..end as usize].join("\n");

        let context_before = if self.config.context_before > 0 && start > 1 {
            let ctx_start = start.saturating_sub(self.config.context_before as u64).max(1);
            Some(lines[(ctx_start - 1) as usize..(start - 1) as usize].join("\n"))
        } else {
            None
        };
        let context_after = if self.config.context_after > 0 && end < total {
            let ctx_end = (end + self.config.context_after as u64).min(total);
            Some(lines[end as usize..ctx_end as usize].join("\n"))
        } else {
            None
        };

        Chunk {
            id: String::new(),
            chunk_type,
            name,
            start_line: start,
            end_line: end,
            content,
            context_before,
            context_after,
            dependencies: Vec::new(),
        }
    }
}

/// Subdivide `[start, end]` into pieces no longer than `max_lines`, cutting
/// at blank lines where possible (statement boundaries are approximated by
/// blank lines for the generic case).
fn split_range(lines: &[&str], start: u64, end: u64, max_lines: usize) -> Vec<(u64, u64)> {
    let max_lines = max_lines.max(1) as u64;
    if end - start + 1 <= max_lines {
        return vec![(start, end)];
    }
    let mut pieces = Vec::new();
    let mut piece_start = start;
    while piece_start <= end {
        let hard_end = (piece_start + max_lines - 1).min(end);
        let mut cut = hard_end;
        if hard_end < end {
            // walk back to the nearest blank line to avoid cutting mid-block
            for candidate in (piece_start..=hard_end).rev() {
                if lines[(candidate - 1) as usize].trim().is_empty() {
                    cut = candidate;
                    break;
                }
            }
        }
        pieces.push((piece_start, cut));
        piece_start = cut + 1;
    }
    pieces
}

/// Line ranges of the file not covered by any chunk yet.
fn uncovered_ranges(chunks: &[Chunk], total_lines: u64) -> Vec<(u64, u64)> {
    let mut covered = vec![false; total_lines as usize];
    for chunk in chunks {
        let start = chunk.start_line.clamp(1, total_lines);
        let end = chunk.end_line.clamp(start, total_lines);
        for idx in (start - 1)..end {
            covered[idx as usize] = true;
        }
    }
    let mut gaps = Vec::new();
    let mut gap_start: Option<u64> = None;
    for (idx, is_covered) in covered.iter().enumerate() {
        if !*is_covered {
            gap_start.get_or_insert(idx as u64 + 1);
        } else if let Some(start) = gap_start.take() {
            gaps.push((start, idx as u64));
        }
    }
    if let Some(start) = gap_start {
        gaps.push((start, total_lines));
    }
    gaps
}

/// Import targets referenced from inside the chunk content: the final
/// identifier of each import statement, when it textually appears in the
/// chunk. Cheap and lossy, like the rest of the extraction.
fn dependencies_for(file: &CodeFile, content: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for import in &file.imports {
        let last_ident = import
            .path
            .rsplit(|c: char| !c.is_alphanumeric() && c != '_')
            .find(|part| !part.is_empty() && part.chars().any(|c| c.is_alphabetic()));
        if let Some(ident) = last_ident {
            if content.contains(ident) && !deps.iter().any(|d| d == ident) {
                deps.push(ident.to_owned());
            }
        }
    }
    deps
}
