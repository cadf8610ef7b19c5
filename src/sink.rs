//! Delivery of finished artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;

/// Receives the encoded PDF under its final file name.
pub trait ArtifactSink {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Writes artifacts into a downloads directory, creating it on first use.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.directory.join(filename)
    }
}

impl ArtifactSink for DirectorySink {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self.path_for(filename);
        fs::write(&path, bytes)?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// A delivered artifact kept in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Keeps every delivered artifact in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactSink for MemorySink {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> io::Result<()> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Artifact {
                filename: filename.to_owned(),
                bytes: bytes.to_vec(),
            });
        Ok(())
    }
}

impl<S: ArtifactSink + ?Sized> ArtifactSink for &S {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> io::Result<()> {
        (**self).deliver(filename, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_sink_creates_the_directory() {
        let root = std::env::temp_dir().join(format!("resume-export-sink-{}", std::process::id()));
        let sink = DirectorySink::new(root.join("downloads"));
        sink.deliver("Ada_oslo.pdf", b"%PDF-1.3").expect("deliver");
        assert_eq!(
            fs::read(sink.path_for("Ada_oslo.pdf")).expect("read back"),
            b"%PDF-1.3"
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn memory_sink_keeps_artifacts_in_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.deliver("a.pdf", b"1").expect("deliver a");
        (&sink).deliver("b.pdf", b"2").expect("deliver b");
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.last().map(|artifact| artifact.filename), Some("b.pdf".to_owned()));
    }
}
