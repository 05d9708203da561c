use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only narrative file. The first commit creates or truncates the
/// file, every later commit appends. Each commit is flushed and closed
/// before it returns, so committed steps survive a later failure.
#[derive(Debug)]
pub struct NarrativeJournal {
    path: PathBuf,
    commits: usize,
}

impl NarrativeJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            commits: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn commit(&mut self, output: &str) -> io::Result<()> {
        let mut file = if self.commits == 0 {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            File::create(&self.path)?
        } else {
            OpenOptions::new().append(true).open(&self.path)?
        };
        file.write_all(output.as_bytes())?;
        file.flush()?;
        self.commits += 1;
        Ok(())
    }
}
