use bytes::Bytes;
use std::fs;
use std::io;
use std::path::PathBuf;

pub const DEFAULT_PAYLOAD_FILE: &str = "test.txt";

/// Where a responder gets the bytes it sends.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Re-read on every request, so edits show up without a restart.
    File(PathBuf),
    Inline(Bytes),
}

impl PayloadSource {
    pub fn load(&self) -> io::Result<Bytes> {
        match self {
            PayloadSource::File(path) => fs::read(path).map(Bytes::from),
            PayloadSource::Inline(bytes) => Ok(bytes.clone()),
        }
    }
}

impl Default for PayloadSource {
    fn default() -> Self {
        PayloadSource::File(PathBuf::from(DEFAULT_PAYLOAD_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_is_read_on_every_load() {
        let path = std::env::temp_dir().join(format!("rdt-payload-{}.txt", std::process::id()));
        fs::write(&path, "first").unwrap();
        let source = PayloadSource::File(path.clone());
        assert_eq!(source.load().unwrap().as_ref(), b"first");

        fs::write(&path, "second").unwrap();
        assert_eq!(source.load().unwrap().as_ref(), b"second");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error() {
        let source = PayloadSource::File(PathBuf::from("/definitely/not/here.txt"));
        assert!(source.load().is_err());
    }
}
