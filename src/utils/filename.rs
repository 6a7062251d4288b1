use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

/// Extension every processed image is written with.
pub const OUTPUT_EXTENSION: &str = "png";

/// Hands out strictly increasing millisecond timestamps for upload names.
///
/// Two uploads landing in the same millisecond get consecutive values instead of
/// the same one, so names never repeat within a process.
#[derive(Debug, Default)]
pub struct FilenameGenerator {
    last: AtomicI64,
}

impl FilenameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    /// `<millis>.<extension>`, or just `<millis>` when the extension is empty
    pub fn next_name(&self, extension: &str) -> String {
        let stamp = self.next_stamp();
        if extension.is_empty() {
            stamp.to_string()
        } else {
            format!("{}.{}", stamp, extension)
        }
    }
}

/// Splits `photo.JPG` into (`photo`, `JPG`).
pub fn split_name(filename: &str) -> (String, String) {
    let path = Path::new(filename);
    let base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    (base, ext)
}

/// Output name for a given base: always `<base>.png`.
pub fn derive_output_name(base_name: &str) -> String {
    format!("{}.{}", base_name, OUTPUT_EXTENSION)
}
