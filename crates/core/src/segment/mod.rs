use thiserror::Error;

/// Default upper bound of a chunk, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 75_000;
/// Default number of characters shared by consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 10_000;

const PARAGRAPH_SEPARATORS: &[&str] = &["\n\n"];
const SENTENCE_SEPARATORS: &[&str] = &[
    ". ", "! ", "? ", ".\n", "!\n", "?\n", "。", "！", "？", "\n",
];
const WORD_SEPARATORS: &[&str] = &[" ", "\t"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// A bounded slice of the source text.
///
/// `offset` is the character position of the chunk in the source and
/// `shared_prefix` the number of leading characters it repeats from the
/// previous chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    content: String,
    sequence_index: usize,
    offset: usize,
    shared_prefix: usize,
}

impl Chunk {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn shared_prefix(&self) -> usize {
        self.shared_prefix
    }

    /// Content without the characters already covered by the previous chunk.
    pub fn fresh_content(&self) -> &str {
        match self.content.char_indices().nth(self.shared_prefix) {
            Some((idx, _)) => &self.content[idx..],
            None => "",
        }
    }

    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Splits text into overlapping chunks, cutting at the largest natural
/// boundary (paragraph, sentence, word) that fits before falling back to a
/// hard character cut.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segmenter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Segmenter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SegmentError> {
        if chunk_size == 0 {
            return Err(SegmentError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(SegmentError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily yields the chunks of `text` in source order.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
        boundaries.push(text.len());
        Chunks {
            text,
            boundaries,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            start: 0,
            prev_end: 0,
            next_index: 0,
            finished: text.is_empty(),
        }
    }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        self.chunks(text).collect()
    }
}

pub struct Chunks<'a> {
    text: &'a str,
    // Byte offset of every char, plus `text.len()` as a sentinel.
    boundaries: Vec<usize>,
    chunk_size: usize,
    chunk_overlap: usize,
    start: usize,
    prev_end: usize,
    next_index: usize,
    finished: bool,
}

impl<'a> Chunks<'a> {
    fn total_chars(&self) -> usize {
        self.boundaries.len() - 1
    }

    fn byte_at(&self, char_idx: usize) -> usize {
        self.boundaries[char_idx]
    }

    fn char_at_byte(&self, byte_idx: usize) -> usize {
        match self.boundaries.binary_search(&byte_idx) {
            Ok(idx) => idx,
            Err(idx) => idx,
        }
    }

    fn char_is_whitespace(&self, char_idx: usize) -> bool {
        self.text[self.byte_at(char_idx)..]
            .chars()
            .next()
            .map(char::is_whitespace)
            .unwrap_or(false)
    }

    /// Picks the end of the chunk starting at `start`. The cut always lands
    /// past `start + chunk_overlap` so the next chunk starts strictly later.
    fn find_cut(&self, start: usize, window_end: usize) -> usize {
        let min_cut = start + self.chunk_overlap + 1;
        for separators in [PARAGRAPH_SEPARATORS, SENTENCE_SEPARATORS, WORD_SEPARATORS] {
            if let Some(cut) = self.last_separator_cut(start, window_end, separators) {
                if cut >= min_cut {
                    return cut;
                }
            }
        }
        window_end
    }

    fn last_separator_cut(
        &self,
        start: usize,
        window_end: usize,
        separators: &[&str],
    ) -> Option<usize> {
        let start_byte = self.byte_at(start);
        let window = &self.text[start_byte..self.byte_at(window_end)];
        separators
            .iter()
            .filter_map(|separator| {
                window
                    .rfind(separator)
                    .map(|idx| self.char_at_byte(start_byte + idx + separator.len()))
            })
            .max()
    }

    /// Start of the chunk following a cut at `cut`: step back by the overlap,
    /// then forward to the next word start when one exists before `cut`.
    fn next_start(&self, cut: usize) -> usize {
        let candidate = cut - self.chunk_overlap;
        if candidate == 0 || candidate == cut || self.char_is_whitespace(candidate - 1) {
            return candidate;
        }
        (candidate..cut)
            .find(|&idx| self.char_is_whitespace(idx))
            .map(|idx| idx + 1)
            .filter(|&next| next < cut)
            .unwrap_or(candidate)
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }

        let total = self.total_chars();
        let start = self.start;
        let window_end = start.saturating_add(self.chunk_size).min(total);
        let cut = if window_end == total {
            total
        } else {
            self.find_cut(start, window_end)
        };

        let chunk = Chunk {
            content: self.text[self.byte_at(start)..self.byte_at(cut)].to_string(),
            sequence_index: self.next_index,
            offset: start,
            shared_prefix: if self.next_index == 0 {
                0
            } else {
                self.prev_end - start
            },
        };

        self.next_index += 1;
        self.prev_end = cut;
        if cut == total {
            self.finished = true;
        } else {
            self.start = self.next_start(cut);
        }

        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(paragraphs: usize) -> String {
        let sentences = [
            "Bilbo counted the spoons twice before the dwarves arrived.",
            "Rain drummed on the round green door!",
            "Was the map older than the mountain itself?",
            "Thorin said nothing, and the fire answered for him.",
            "Nobody slept.",
        ];
        let mut text = String::new();
        for p in 0..paragraphs {
            for s in 0..(p % 4 + 2) {
                text.push_str(sentences[(p + s) % sentences.len()]);
                text.push(' ');
            }
            text.push_str("\n\n");
        }
        text
    }

    fn reconstruct(chunks: &[Chunk]) -> String {
        chunks.iter().map(Chunk::fresh_content).collect()
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert_eq!(Segmenter::new(0, 0), Err(SegmentError::ZeroChunkSize));
        assert_eq!(
            Segmenter::new(100, 100),
            Err(SegmentError::OverlapTooLarge {
                size: 100,
                overlap: 100
            })
        );
        assert!(Segmenter::new(100, 150).is_err());
        assert!(Segmenter::new(100, 99).is_ok());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let segmenter = Segmenter::new(10, 2).unwrap();
        assert_eq!(segmenter.chunks("").count(), 0);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let segmenter = Segmenter::new(1_000, 100).unwrap();
        let chunks = segmenter.split("A short tale.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), "A short tale.");
        assert_eq!(chunks[0].shared_prefix(), 0);
    }

    #[test]
    fn chunks_cover_the_source_exactly() {
        let text = sample_text(60);
        for (size, overlap) in [(120, 0), (120, 30), (200, 199), (500, 80), (64, 10)] {
            let segmenter = Segmenter::new(size, overlap).unwrap();
            let chunks = segmenter.split(&text);
            assert_eq!(reconstruct(&chunks), text, "size={size} overlap={overlap}");
            for (idx, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.sequence_index(), idx);
                assert!(chunk.char_len() <= size);
            }
        }
    }

    #[test]
    fn overlap_is_bounded_and_present() {
        let text = sample_text(40);
        let segmenter = Segmenter::new(150, 40).unwrap();
        let chunks = segmenter.split(&text);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let shared = pair[1].shared_prefix();
            assert!(shared > 0 && shared <= 40, "shared={shared}");
            let tail: String = pair[0]
                .content()
                .chars()
                .skip(pair[0].char_len() - shared)
                .collect();
            let head: String = pair[1].content().chars().take(shared).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn zero_overlap_produces_disjoint_chunks() {
        let text = sample_text(20);
        let chunks = Segmenter::new(100, 0).unwrap().split(&text);
        assert!(chunks.iter().all(|chunk| chunk.shared_prefix() == 0));
        let joined: String = chunks.iter().map(Chunk::content).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph follows it.";
        let chunks = Segmenter::new(40, 0).unwrap().split(text);
        assert_eq!(chunks[0].content(), "First paragraph here.\n\n");
        assert_eq!(chunks[1].content(), "Second paragraph follows it.");
    }

    #[test]
    fn falls_back_to_sentence_then_word_boundaries() {
        let text = "One two three. Four five six seven eight";
        let chunks = Segmenter::new(20, 0).unwrap().split(text);
        assert_eq!(chunks[0].content(), "One two three. ");

        let words = "alpha beta gamma delta epsilon";
        let chunks = Segmenter::new(13, 0).unwrap().split(words);
        assert_eq!(chunks[0].content(), "alpha beta ");
    }

    #[test]
    fn hard_cuts_text_without_boundaries() {
        let text = "x".repeat(25);
        let chunks = Segmenter::new(10, 3).unwrap().split(&text);
        assert!(chunks.iter().all(|chunk| chunk.char_len() <= 10));
        assert_eq!(chunks[0].char_len(), 10);
        assert_eq!(chunks[1].offset(), 7);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn handles_multibyte_characters() {
        let text = "这是第一句。这是第二句，长度会超过限制，需要被拆分。无标点且很长的段落需要被切割";
        let chunks = Segmenter::new(10, 2).unwrap().split(text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.char_len() <= 10));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn large_source_with_default_sizes_yields_two_chunks() {
        let text = sample_text(2_000);
        let text: String = text.chars().cycle().take(120_000).collect();
        let chunks = Segmenter::default().split(&text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].shared_prefix() <= DEFAULT_CHUNK_OVERLAP);
        assert_eq!(reconstruct(&chunks), text);
    }
}
