//! Structural integrity check for the protected file.
//!
//! Missing is a legitimate state (the owning application has not created the
//! file yet), not an error. Anything that prevents a successful parse of
//! present bytes is Corrupt; nothing panics or propagates past this boundary.

use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// A successfully parsed target document plus the byte length it was read
/// at, so size checks don't need a second stat.
#[derive(Debug, Clone)]
pub struct Document {
    pub value: Value,
    pub byte_len: u64,
}

#[derive(Debug)]
pub enum FileState {
    Missing,
    Valid(Document),
    Corrupt(String),
}

/// Classify the file at `path`. Side-effect free.
pub fn classify(path: &Path) -> FileState {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return FileState::Missing,
        Err(e) => return FileState::Corrupt(format!("unreadable: {e}")),
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => FileState::Valid(Document {
            value,
            byte_len: bytes.len() as u64,
        }),
        Err(e) => FileState::Corrupt(e.to_string()),
    }
}

/// Cheap validity probe used when scanning snapshots.
pub fn is_valid_json(path: &Path) -> bool {
    matches!(classify(path), FileState::Valid(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_missing_not_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(classify(&dir.path().join("absent.json")), FileState::Missing));
    }

    #[test]
    fn valid_document_carries_byte_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{\"projects\":{}}").unwrap();
        match classify(&path) {
            FileState::Valid(doc) => {
                assert_eq!(doc.byte_len, 15);
                assert!(doc.value.get("projects").is_some());
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn truncated_bytes_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{\"projects\":{\"a\":").unwrap();
        assert!(matches!(classify(&path), FileState::Corrupt(_)));
        assert!(!is_valid_json(&path));
    }
}
