pub const SECTION_SEPARATOR: &str = "\nxx\n";

/// Context fed to every chapter call: the persisted narrative followed by
/// each generated section, each one preceded by [`SECTION_SEPARATOR`].
/// Only ever grows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChapterAccumulator {
    context: String,
    sections: usize,
}

impl ChapterAccumulator {
    pub fn new(narrative: impl Into<String>) -> Self {
        Self {
            context: narrative.into(),
            sections: 0,
        }
    }

    pub fn push(&mut self, section: &str) {
        self.context.push_str(SECTION_SEPARATOR);
        self.context.push_str(section.trim());
        self.sections += 1;
    }

    pub fn as_str(&self) -> &str {
        &self.context
    }

    pub fn sections(&self) -> usize {
        self.sections
    }
}

/// The generated sections in order, each trimmed and followed by a blank
/// line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalChapter {
    body: String,
    sections: usize,
}

impl FinalChapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, section: &str) {
        self.body.push_str(section.trim());
        self.body.push_str("\n\n");
        self.sections += 1;
    }

    pub fn sections(&self) -> usize {
        self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections == 0
    }

    /// File content: the trimmed body with a trailing blank line.
    pub fn render(&self) -> String {
        format!("{}\n\n", self.body.trim())
    }
}
