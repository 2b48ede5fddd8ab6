//! Line-aligned text chunking
//!
//! Splits file text into overlapping chunks sized by a character budget.
//! Chunks never start or end mid-line, adjacent chunks overlap by roughly
//! `overlap` characters, and the union of line ranges always covers the
//! whole file. Each chunk's content is prefixed with a `File: <path>` header
//! to give the embedder path context; the header is stripped for display.

/// One chunk of a file, lines `start_line..=end_line` (1-based, inclusive).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub start_line: u32,
    pub end_line: u32,
    /// Embedding text: header + the chunk's lines.
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// `size` is the target chunk length in characters, `overlap` the
    /// approximate character overlap between adjacent chunks.
    pub fn new(size: usize, overlap: usize) -> Self {
        Self {
            size: size.max(1),
            overlap,
        }
    }

    /// Split `content` into line-aligned chunks. An empty file yields no
    /// chunks.
    pub fn chunk(&self, file_path: &str, content: &str) -> Vec<ChunkSpan> {
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        if total == 0 {
            return Vec::new();
        }

        let header = chunk_header(file_path);
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            // Fill the chunk until the char budget is reached; always take
            // at least one line so oversized lines still make progress.
            let mut end = start;
            let mut chars = 0usize;
            while end < total && (chars < self.size || end == start) {
                chars += lines[end].len() + 1;
                end += 1;
            }

            let mut content = String::with_capacity(header.len() + chars);
            content.push_str(&header);
            for (i, line) in lines[start..end].iter().enumerate() {
                if i > 0 {
                    content.push('\n');
                }
                content.push_str(line);
            }

            chunks.push(ChunkSpan {
                start_line: (start + 1) as u32,
                end_line: end as u32,
                content,
            });

            if end >= total {
                break;
            }

            // Back up over ~overlap chars of trailing lines, but always
            // advance past the previous start.
            let mut next = end;
            let mut backed = 0usize;
            while next > start + 1 && backed < self.overlap {
                backed += lines[next - 1].len() + 1;
                next -= 1;
            }
            start = next;
        }

        chunks
    }
}

/// The embedding header prepended to every chunk.
pub fn chunk_header(file_path: &str) -> String {
    format!("File: {}\n\n", file_path)
}

/// Strip the `File: <path>` header for display. Content without a header is
/// returned unchanged.
pub fn display_content(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("File: ") {
        if let Some(idx) = rest.find("\n\n") {
            return &rest[idx + 2..];
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(chunks: &[ChunkSpan]) -> (u32, u32) {
        let mut covered_to = 0u32;
        for chunk in chunks {
            assert!(
                chunk.start_line <= covered_to + 1,
                "gap before line {}",
                chunk.start_line
            );
            covered_to = covered_to.max(chunk.end_line);
        }
        (chunks[0].start_line, covered_to)
    }

    #[test]
    fn test_small_file_is_a_single_chunk() {
        let chunker = Chunker::new(512, 50);
        let chunks = chunker.chunk("src/a.rs", "fn main() {}\n");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert!(chunks[0].content.starts_with("File: src/a.rs\n\n"));
    }

    #[test]
    fn test_chunks_cover_the_whole_file() {
        let content: String = (1..=200)
            .map(|i| format!("let value_{} = compute({});\n", i, i))
            .collect();
        let chunker = Chunker::new(256, 64);
        let chunks = chunker.chunk("src/big.rs", &content);

        assert!(chunks.len() > 1);
        let (first, last) = coverage(&chunks);
        assert_eq!(first, 1);
        assert_eq!(last, 200);
    }

    #[test]
    fn test_adjacent_chunks_overlap_on_line_boundaries() {
        let content: String = (1..=60).map(|i| format!("line number {}\n", i)).collect();
        let chunker = Chunker::new(200, 40);
        let chunks = chunker.chunk("notes.go", &content);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // Overlap means the next chunk starts at or before the previous end.
            assert!(pair[1].start_line <= pair[0].end_line);
            // But it must always advance.
            assert!(pair[1].start_line > pair[0].start_line);
        }
    }

    #[test]
    fn test_empty_file_yields_no_chunks() {
        let chunker = Chunker::new(512, 50);
        assert!(chunker.chunk("empty.rs", "").is_empty());
    }

    #[test]
    fn test_oversized_line_still_advances() {
        let content = format!("{}\nshort\n", "x".repeat(5000));
        let chunker = Chunker::new(100, 20);
        let chunks = chunker.chunk("gen.js", &content);

        let (first, last) = coverage(&chunks);
        assert_eq!(first, 1);
        assert_eq!(last, 2);
    }

    #[test]
    fn test_display_content_strips_header() {
        let chunker = Chunker::new(512, 50);
        let chunks = chunker.chunk("src/a.rs", "fn main() {}\n");

        assert_eq!(display_content(&chunks[0].content), "fn main() {}");
        assert_eq!(display_content("no header here"), "no header here");
    }
}
