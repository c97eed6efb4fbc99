use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

/// Sources larger than this are rejected before decode; huge files stall or
/// crash constrained devices long before the pipeline gets a say.
pub const MAX_SOURCE_BYTES: u64 = 20 * 1024 * 1024;

/// Encoded image bytes as handed over by a capture collaborator.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture permission denied")]
    PermissionDenied,
    #[error("capture device or file not found")]
    NotFound,
    #[error("capture device is busy")]
    Busy,
    #[error("capture constraints cannot be satisfied: {0}")]
    Unsatisfiable(String),
    #[error("capture source unreadable: {0}")]
    Unreadable(String),
}

impl CaptureError {
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => {
                "Access to the capture source was denied. Allow access in your \
                 device settings and try again."
            }
            CaptureError::NotFound => {
                "No capture source was found. Connect a camera or pick an \
                 existing photo."
            }
            CaptureError::Busy => {
                "The capture source is in use by another application. Close it \
                 and try again."
            }
            CaptureError::Unsatisfiable(_) => {
                "The capture source cannot deliver a usable photo. Try a \
                 smaller image or a different device."
            }
            CaptureError::Unreadable(_) => {
                "The photo could not be read. Try a different file or use the \
                 camera."
            }
        }
    }
}

/// A capture collaborator. `release` must run on every exit path, success or
/// failure; a held device blocks the next acquisition.
pub trait CaptureSource {
    fn capture(&mut self) -> Result<RawImage, CaptureError>;

    fn release(&mut self) {}
}

/// Runs one capture and releases the source regardless of outcome.
pub fn capture_with_release(source: &mut dyn CaptureSource) -> Result<RawImage, CaptureError> {
    let result = source.capture();
    source.release();
    result
}

/// Capture source backed by a file on disk (the "file picker" collaborator).
#[derive(Debug, Clone)]
pub struct FileCapture {
    path: PathBuf,
    max_bytes: u64,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: MAX_SOURCE_BYTES,
        }
    }

    pub fn with_limit(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
        }
    }
}

impl CaptureSource for FileCapture {
    fn capture(&mut self) -> Result<RawImage, CaptureError> {
        let metadata = std::fs::metadata(&self.path).map_err(map_io_error)?;
        if metadata.len() > self.max_bytes {
            return Err(CaptureError::Unsatisfiable(format!(
                "{} is {} bytes, over the {} byte limit",
                self.path.display(),
                metadata.len(),
                self.max_bytes
            )));
        }
        let bytes = std::fs::read(&self.path).map_err(map_io_error)?;
        Ok(RawImage {
            bytes,
            mime_type: guess_image_mime(&self.path).to_string(),
        })
    }
}

fn map_io_error(err: std::io::Error) -> CaptureError {
    match err.kind() {
        ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
        ErrorKind::NotFound => CaptureError::NotFound,
        ErrorKind::WouldBlock => CaptureError::Busy,
        _ => CaptureError::Unreadable(err.to_string()),
    }
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        _ => "image/png",
    }
}

/// Decodes a `data:image/...;base64,` URI, the form camera collaborators
/// hand over.
pub fn decode_data_url(data_url: &str) -> Result<RawImage, CaptureError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| CaptureError::Unreadable("not a data URL".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| CaptureError::Unreadable("data URL has no payload".to_string()))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| CaptureError::Unreadable("data URL is not base64".to_string()))?;
    if !mime_type.starts_with("image/") {
        return Err(CaptureError::Unsatisfiable(format!(
            "expected an image payload, got '{mime_type}'"
        )));
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|err| CaptureError::Unreadable(format!("base64 decode failed: {err}")))?;
    if bytes.is_empty() {
        return Err(CaptureError::Unreadable("data URL payload is empty".to_string()));
    }
    Ok(RawImage {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        capture_with_release, decode_data_url, CaptureError, CaptureSource, FileCapture, RawImage,
    };

    struct RecordingSource {
        outcome: Option<Result<RawImage, CaptureError>>,
        releases: usize,
    }

    impl RecordingSource {
        fn new(outcome: Result<RawImage, CaptureError>) -> Self {
            Self {
                outcome: Some(outcome),
                releases: 0,
            }
        }
    }

    impl CaptureSource for RecordingSource {
        fn capture(&mut self) -> Result<RawImage, CaptureError> {
            self.outcome.take().expect("single capture")
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    #[test]
    fn release_runs_on_success() {
        let mut source = RecordingSource::new(Ok(RawImage {
            bytes: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
        }));
        capture_with_release(&mut source).expect("capture");
        assert_eq!(source.releases, 1);
    }

    #[test]
    fn release_runs_on_failure() {
        let mut source = RecordingSource::new(Err(CaptureError::Busy));
        let err = capture_with_release(&mut source).expect_err("capture fails");
        assert!(matches!(err, CaptureError::Busy));
        assert_eq!(source.releases, 1);
    }

    #[test]
    fn file_capture_reads_bytes_and_guesses_mime() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("eye.jpg");
        fs::write(&path, b"jpeg-ish bytes").expect("write fixture");

        let raw = FileCapture::new(&path).capture().expect("capture");
        assert_eq!(raw.bytes, b"jpeg-ish bytes");
        assert_eq!(raw.mime_type, "image/jpeg");
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = FileCapture::new(temp.path().join("absent.png"))
            .capture()
            .expect_err("missing file");
        assert!(matches!(err, CaptureError::NotFound));
    }

    #[test]
    fn oversized_file_is_unsatisfiable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("huge.png");
        fs::write(&path, vec![0u8; 128]).expect("write fixture");

        let err = FileCapture::with_limit(&path, 64)
            .capture()
            .expect_err("over limit");
        assert!(matches!(err, CaptureError::Unsatisfiable(_)));
    }

    #[test]
    fn error_variants_have_distinct_user_messages() {
        let messages = [
            CaptureError::PermissionDenied.user_message(),
            CaptureError::NotFound.user_message(),
            CaptureError::Busy.user_message(),
            CaptureError::Unsatisfiable(String::new()).user_message(),
            CaptureError::Unreadable(String::new()).user_message(),
        ];
        for (i, left) in messages.iter().enumerate() {
            for right in &messages[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn data_url_decodes_payload_and_mime() {
        let raw = decode_data_url("data:image/png;base64,aGVsbG8=").expect("decode");
        assert_eq!(raw.bytes, b"hello");
        assert_eq!(raw.mime_type, "image/png");
    }

    #[test]
    fn non_image_data_url_is_rejected() {
        let err = decode_data_url("data:text/plain;base64,aGVsbG8=").expect_err("not an image");
        assert!(matches!(err, CaptureError::Unsatisfiable(_)));
    }

    #[test]
    fn malformed_data_url_is_unreadable() {
        assert!(matches!(
            decode_data_url("nope"),
            Err(CaptureError::Unreadable(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64"),
            Err(CaptureError::Unreadable(_))
        ));
    }
}
