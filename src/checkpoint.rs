use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use log::warn;

const KEY: &str = "last_scraped_page";

/// Single-value progress marker: a text file of the form
/// `last_scraped_page=<n>` recording the last page fully processed.
///
/// A restart resumes AT the recorded page, re-processing it, so rows from
/// that one page can be duplicated in the output. No locking; a single
/// active process is assumed.
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Checkpoint { path: path.as_ref().to_path_buf() }
    }

    /// Last recorded page, or 1 when the file is absent or malformed.
    pub fn read(&self) -> u32 {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return 1,
        };
        let trimmed = content.trim();
        match trimmed.strip_prefix(KEY).and_then(|r| r.strip_prefix('=')) {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(page) if page >= 1 => page,
                _ => {
                    warn!("Malformed progress file {:?}. Defaulting to page 1.", self.path);
                    1
                }
            },
            None => {
                warn!("Malformed progress file {:?}. Defaulting to page 1.", self.path);
                1
            }
        }
    }

    pub fn write(&self, page: u32) -> io::Result<()> {
        fs::write(&self.path, format!("{}={}", KEY, page))
    }
}
