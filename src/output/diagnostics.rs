//! Advisory page captures for scans that found nothing
//!
//! Files are named by coordinate and never read back by the crawler.

use crate::state::WorkCoordinate;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DiagnosticsWriter {
    dir: PathBuf,
}

impl DiagnosticsWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the page markup for `coordinate`; failures are logged and ignored
    pub fn capture(&self, coordinate: &WorkCoordinate, html: &str, reason: &str) -> Option<PathBuf> {
        let name = format!(
            "{}-{}-{}.html",
            sanitize(&coordinate.partition),
            coordinate.page,
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let path = self.dir.join(name);
        let body = format!("<!-- {}: {} -->\n{}", coordinate, reason.replace("--", "- -"), html);

        match fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, body)) {
            Ok(()) => {
                debug!("Diagnostic capture written to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Could not write diagnostic capture {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn sanitize(partition: &str) -> String {
    partition
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_capture_names_by_coordinate() {
        let dir = TempDir::new().unwrap();
        let writer = DiagnosticsWriter::new(dir.path().join("diag"));

        let path = writer
            .capture(&WorkCoordinate::new("S", 7), "<p>blank</p>", "no items")
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("S-7-"), "{}", name);
        assert!(name.ends_with(".html"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<!-- S-7: no items -->"));
        assert!(content.contains("<p>blank</p>"));
    }

    #[test]
    fn test_partition_is_sanitized() {
        assert_eq!(sanitize("a/b c"), "a_b_c");
    }
}
