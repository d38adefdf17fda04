//! Line-aligned text chunker with trailing overlap.
//!
//! Sizes are approximated at 4 characters per token. Lines are accumulated
//! until the next one would overflow the budget; the buffer is then emitted as
//! a [`Chunk`] and its trailing lines (up to the overlap budget) seed the next
//! buffer. A single line is never split: one that is too large on its own
//! becomes a chunk by itself.

use super::files::hash_text;
use super::types::Chunk;
use crate::config::ChunkingConfig;

const CHARS_PER_TOKEN: usize = 4;

/// Smallest chunk budget in characters, whatever the configuration says.
const MIN_CHUNK_CHARS: usize = 32;

struct Line<'a> {
    text: &'a str,
    number: usize,
    chars: usize,
}

impl Line<'_> {
    /// Length including the newline that joins it to the next line.
    fn size(&self) -> usize {
        self.chars + 1
    }
}

/// Split `content` into ordered chunks covering every line.
///
/// Empty input and a lone empty line produce no chunks. Any other input,
/// whitespace-only text included, produces at least one.
pub fn chunk_markdown(content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if content.is_empty() || content == "\n" {
        return Vec::new();
    }

    let max_chars = (config.tokens * CHARS_PER_TOKEN).max(MIN_CHUNK_CHARS);
    let overlap_chars = config.overlap * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut buffer: Vec<Line> = Vec::new();
    let mut buffer_chars = 0usize;

    for (idx, text) in content.split('\n').enumerate() {
        let line = Line {
            text,
            number: idx + 1,
            chars: text.chars().count(),
        };

        if line.chars > max_chars && buffer.is_empty() {
            chunks.push(make_chunk(std::slice::from_ref(&line)));
            continue;
        }

        if buffer_chars + line.size() > max_chars && !buffer.is_empty() {
            chunks.push(make_chunk(&buffer));
            buffer = carry_overlap(buffer, overlap_chars);
            buffer_chars = buffer.iter().map(Line::size).sum();
        }

        buffer_chars += line.size();
        buffer.push(line);
    }

    if !buffer.is_empty() {
        chunks.push(make_chunk(&buffer));
    }

    chunks
}

/// Keep the shortest tail of `buffer` whose size reaches `overlap_chars`.
fn carry_overlap(mut buffer: Vec<Line<'_>>, overlap_chars: usize) -> Vec<Line<'_>> {
    if overlap_chars == 0 {
        buffer.clear();
        return buffer;
    }

    let mut acc = 0;
    let mut keep_from = buffer.len();
    while keep_from > 0 {
        keep_from -= 1;
        acc += buffer[keep_from].size();
        if acc >= overlap_chars {
            break;
        }
    }
    buffer.split_off(keep_from)
}

fn make_chunk(lines: &[Line<'_>]) -> Chunk {
    let text = lines.iter().map(|l| l.text).collect::<Vec<_>>().join("\n");
    Chunk {
        start_line: lines.first().map_or(1, |l| l.number),
        end_line: lines.last().map_or(1, |l| l.number),
        hash: hash_text(&text),
        text,
    }
}
