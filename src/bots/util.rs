// Shared bot utilities (MIME mapping, file naming, upload allow-list, HTTP status checks)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;

use super::error::{BotError, BotResult};

/// Upload size ceiling (10 MB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// MIME types the upload endpoint accepts.
const UPLOAD_ALLOWED_MIME: &[&str] = &[
    // images
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    // documents
    "application/pdf",
    "text/plain",
    "text/markdown",
    "text/html",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
    "message/rfc822",
    "application/vnd.ms-outlook",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/xml",
    "application/epub+zip",
    // audio
    "audio/mpeg",
    "audio/mp4",
    "audio/wav",
    "audio/webm",
    "audio/amr",
    // video
    "video/mp4",
    "video/quicktime",
    "video/mpeg",
    "video/x-msvideo",
];

/// Strip MIME parameters (`text/plain; charset=utf-8` → `text/plain`).
fn base_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

pub fn is_upload_mime_allowed(mime: &str) -> bool {
    UPLOAD_ALLOWED_MIME.contains(&base_mime(mime).as_str())
}

/// Check one file against the allow-list and size ceiling.
pub fn check_upload(name: &str, mime: &str, size: u64) -> Result<(), String> {
    if !is_upload_mime_allowed(mime) {
        return Err(format!("file type '{}' is not allowed ({})", mime, name));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(format!(
            "file exceeds {} MB limit ({} bytes)",
            MAX_UPLOAD_BYTES / 1024 / 1024,
            size
        ));
    }
    Ok(())
}

/// Dify `files[].type` for a MIME type.
pub fn dify_file_type(mime: &str) -> &'static str {
    const DOCUMENT_MIME: &[&str] = &[
        "application/pdf",
        "text/plain",
        "text/markdown",
        "text/html",
        "text/csv",
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.ms-powerpoint",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "application/xml",
        "application/epub+zip",
        "message/rfc822",
        "application/vnd.ms-outlook",
    ];
    let mime = base_mime(mime);
    if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("audio/") {
        "audio"
    } else if mime.starts_with("video/") {
        "video"
    } else if DOCUMENT_MIME.contains(&mime.as_str()) {
        "document"
    } else {
        "custom"
    }
}

/// MIME for an agent-produced file, from the platform's coarse `type` tag.
pub fn agent_file_mime(file_type: &str) -> &'static str {
    match file_type {
        "image" => "image/png",
        "document" => "application/pdf",
        "audio" => "audio/mpeg",
        "video" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Map a file extension (without dot, any case) to a MIME type.
pub fn ext_to_mime(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "rar" => "application/vnd.rar",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Map MIME type to file extension.
pub fn mime_to_ext(mime: &str) -> &'static str {
    match base_mime(mime).as_str() {
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/wav" => "wav",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/csv" => "csv",
        _ => "bin",
    }
}

/// Last path segment of a URL, without query or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if name.is_empty() || name.contains(':') {
        "file".to_string()
    } else {
        name.to_string()
    }
}

/// Sanitize a filename to prevent path traversal.
/// Strips path separators, leading dots, and null bytes.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("file");
    let cleaned: String = base.chars().filter(|c| *c != '\0').collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Trim trailing slashes so paths can be appended with `format!("{}/x")`.
pub fn trim_base(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

/// Turn a non-success response into `BotError::Http` carrying the body text.
pub async fn ensure_success(response: reqwest::Response) -> BotResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(BotError::Http { status, body })
}

/// Epoch seconds or milliseconds, normalized to milliseconds.
pub fn epoch_to_ms(raw: i64) -> i64 {
    if raw.abs() < 10_000_000_000 {
        raw * 1000
    } else {
        raw
    }
}

/// Timestamps arrive as epoch numbers (s or ms), numeric strings, or RFC 3339 / RFC 2822 text.
pub fn parse_timestamp_ms(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(epoch_to_ms),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return Some(epoch_to_ms(n));
            }
            chrono::DateTime::parse_from_rfc3339(s)
                .or_else(|_| chrono::DateTime::parse_from_rfc2822(s))
                .map(|dt| dt.timestamp_millis())
                .ok()
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|dt| dt.and_utc().timestamp_millis())
                })
        }
        _ => None,
    }
}

/// Stop handle of the request in flight on one client.
///
/// Every request registers its own channel and clears it when its guard drops, so a
/// stop issued after a request finished cannot land on that request's stale sender.
#[derive(Default)]
pub struct CancelSlot {
    seq: AtomicU64,
    current: Mutex<Option<(u64, watch::Sender<bool>)>>,
}

impl CancelSlot {
    /// Register a new request; the previous one (if still running) is cancelled.
    pub fn register(&self) -> (CancelGuard<'_>, watch::Receiver<bool>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(false);
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace((seq, tx));
        if let Some((_, previous)) = previous {
            let _ = previous.send(true);
        }
        (CancelGuard { slot: self, seq }, rx)
    }

    /// Signal the registered request. False when nothing is in flight.
    pub fn cancel(&self) -> bool {
        match self.current.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some((_, tx)) => {
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

/// Clears its request's entry in a [`CancelSlot`] on drop.
pub struct CancelGuard<'a> {
    slot: &'a CancelSlot,
    seq: u64,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        let mut current = self.slot.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().map(|(seq, _)| *seq) == Some(self.seq) {
            *current = None;
        }
    }
}
