//! File kinds accepted by the Bot API, pre-send validation, and the shared
//! multipart body.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::json;
use tracing::warn;

use crate::error::DispatchError;
use crate::utils::format_bytes;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Document,
    Photo,
    Audio,
    Video,
    Animation,
    Voice,
    VideoNote,
    Sticker,
}

impl FileKind {
    pub const ALL: [FileKind; 8] = [
        FileKind::Document,
        FileKind::Photo,
        FileKind::Audio,
        FileKind::Video,
        FileKind::Animation,
        FileKind::Voice,
        FileKind::VideoNote,
        FileKind::Sticker,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FileKind::Document => "document",
            FileKind::Photo => "photo",
            FileKind::Audio => "audio",
            FileKind::Video => "video",
            FileKind::Animation => "animation",
            FileKind::Voice => "voice",
            FileKind::VideoNote => "video_note",
            FileKind::Sticker => "sticker",
        }
    }

    /// Bot API method for a single file of this kind.
    pub fn api_method(self) -> &'static str {
        match self {
            FileKind::Document => "sendDocument",
            FileKind::Photo => "sendPhoto",
            FileKind::Audio => "sendAudio",
            FileKind::Video => "sendVideo",
            FileKind::Animation => "sendAnimation",
            FileKind::Voice => "sendVoice",
            FileKind::VideoNote => "sendVideoNote",
            FileKind::Sticker => "sendSticker",
        }
    }

    /// Accepted MIME types. Empty means any type (generic documents).
    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            FileKind::Document => &[],
            FileKind::Photo => &["image/jpeg", "image/png"],
            FileKind::Audio => &["audio/mpeg", "audio/mp3"],
            FileKind::Video => &["video/mp4", "video/quicktime"],
            FileKind::Animation => &["video/mp4", "image/gif"],
            FileKind::Voice => &["audio/ogg", "audio/mpeg"],
            FileKind::VideoNote => &["video/mp4"],
            FileKind::Sticker => &["image/webp"],
        }
    }

    pub fn max_file_size(self) -> u64 {
        match self {
            FileKind::Photo => 10 * MB,
            FileKind::Sticker => 512 * 1024,
            _ => 50 * MB,
        }
    }

    pub fn max_files(self) -> usize {
        match self {
            FileKind::Document | FileKind::Photo | FileKind::Audio | FileKind::Video => 10,
            FileKind::Animation | FileKind::Voice | FileKind::VideoNote | FileKind::Sticker => 1,
        }
    }

    fn accepts(self, mime: &str) -> bool {
        let allowed = self.mime_types();
        allowed.is_empty() || allowed.contains(&mime)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        FileKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| DispatchError::UnknownFileKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

fn check_file(path: &Path, kind: FileKind) -> Result<CheckedFile, String> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Err("File not found".to_string()),
    };
    if !metadata.is_file() {
        return Err("Not a file".to_string());
    }
    let size = metadata.len();
    if size == 0 {
        return Err("File must be not empty".to_string());
    }
    if size > kind.max_file_size() {
        return Err(format!(
            "File must be less than {}, this file is {}",
            format_bytes(kind.max_file_size()),
            format_bytes(size)
        ));
    }

    let mime_type = match (kind, mime_guess::from_path(path).first_raw()) {
        (FileKind::Document, Some(mime)) => mime.to_string(),
        (FileKind::Document, None) => "application/octet-stream".to_string(),
        (_, None) => return Err("Cannot determine MIME type".to_string()),
        (_, Some(mime)) if !kind.accepts(mime) => {
            return Err(format!(
                "File type {} is not allowed by Telegram for {}",
                mime, kind
            ));
        }
        (_, Some(mime)) => mime.to_string(),
    };

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| kind.name().to_string());

    Ok(CheckedFile {
        path: path.to_path_buf(),
        file_name,
        mime_type,
        size,
    })
}

/// Validate every file for `kind`. Invalid files fail the whole call unless
/// `skip_invalid` is set, in which case they are dropped with a warning.
pub fn check_files(
    files: &[PathBuf],
    kind: FileKind,
    skip_invalid: bool,
) -> Result<Vec<CheckedFile>, DispatchError> {
    if files.len() > kind.max_files() {
        return Err(DispatchError::FileCountExceeded {
            kind: kind.name(),
            count: files.len(),
            max: kind.max_files(),
        });
    }

    let mut checked = Vec::with_capacity(files.len());
    let mut invalid = Vec::new();
    for path in files {
        match check_file(path, kind) {
            Ok(file) => checked.push(file),
            Err(reason) => invalid.push(format!("{}: {}", path.display(), reason)),
        }
    }

    if !invalid.is_empty() {
        if !skip_invalid {
            return Err(DispatchError::FileValidationError(invalid));
        }
        for problem in &invalid {
            warn!("skipping invalid file {}", problem);
        }
    }
    if checked.is_empty() {
        return Err(DispatchError::FileValidationError(if invalid.is_empty() {
            vec!["no files given".to_string()]
        } else {
            invalid
        }));
    }
    Ok(checked)
}

/// One multipart body shared by every recipient. Only the leading `chat_id`
/// part differs, so the file parts are encoded once.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    api_method: &'static str,
    shared: Vec<u8>,
}

impl MultipartBody {
    pub fn build(files: &[CheckedFile], kind: FileKind) -> std::io::Result<Self> {
        let boundary = format!("----tgsend{}", uuid::Uuid::new_v4().simple());
        let mut shared = Vec::new();

        let api_method = if files.len() == 1 {
            write_file_part(&mut shared, &boundary, kind.name(), &files[0])?;
            kind.api_method()
        } else {
            let media: Vec<_> = (0..files.len())
                .map(|i| json!({"type": kind.name(), "media": format!("attach://file{}", i)}))
                .collect();
            write_part_header(&mut shared, &boundary, "media", None, Some("application/json"));
            shared.extend_from_slice(serde_json::Value::Array(media).to_string().as_bytes());
            shared.extend_from_slice(b"\r\n");
            for (i, file) in files.iter().enumerate() {
                write_file_part(&mut shared, &boundary, &format!("file{}", i), file)?;
            }
            "sendMediaGroup"
        };
        shared.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Ok(Self {
            boundary,
            api_method,
            shared,
        })
    }

    pub fn api_method(&self) -> &'static str {
        self.api_method
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Full request body for one recipient.
    pub fn for_chat(&self, chat_id: i64) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.shared.len() + 128);
        write_part_header(&mut body, &self.boundary, "chat_id", None, None);
        body.extend_from_slice(chat_id.to_string().as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&self.shared);
        body
    }
}

/// Files checked and encoded for one send, before any request goes out.
#[derive(Debug, Clone)]
pub struct PreparedFiles {
    kind: FileKind,
    count: usize,
    body: MultipartBody,
}

impl PreparedFiles {
    pub fn prepare(files: &[PathBuf], kind: FileKind, skip_invalid: bool) -> Result<Self, DispatchError> {
        let checked = check_files(files, kind, skip_invalid)?;
        let body = MultipartBody::build(&checked, kind).map_err(|e| {
            DispatchError::FileValidationError(vec![format!("failed to read files: {}", e)])
        })?;
        Ok(Self {
            kind,
            count: checked.len(),
            body,
        })
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Files left after validation.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn body(&self) -> &MultipartBody {
        &self.body
    }

    pub fn into_body(self) -> MultipartBody {
        self.body
    }
}

fn write_part_header(
    out: &mut Vec<u8>,
    boundary: &str,
    name: &str,
    file_name: Option<&str>,
    content_type: Option<&str>,
) {
    out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    let disposition = match file_name {
        Some(file_name) => format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            name,
            file_name.replace('"', "'")
        ),
        None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
    };
    out.extend_from_slice(disposition.as_bytes());
    if let Some(content_type) = content_type {
        out.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
}

fn write_file_part(
    out: &mut Vec<u8>,
    boundary: &str,
    name: &str,
    file: &CheckedFile,
) -> std::io::Result<()> {
    write_part_header(out, boundary, name, Some(&file.file_name), Some(&file.mime_type));
    out.extend_from_slice(&fs::read(&file.path)?);
    out.extend_from_slice(b"\r\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("photo".parse::<FileKind>().unwrap(), FileKind::Photo);
        assert_eq!("video-note".parse::<FileKind>().unwrap(), FileKind::VideoNote);
        assert_eq!("Video_Note".parse::<FileKind>().unwrap(), FileKind::VideoNote);
        assert!(matches!(
            "gif".parse::<FileKind>().unwrap_err(),
            DispatchError::UnknownFileKind(_)
        ));
    }

    #[test]
    fn test_catalog_limits() {
        for kind in FileKind::ALL {
            assert!((1..=10).contains(&kind.max_files()));
            assert!(kind.max_file_size() > 0);
            assert!(kind.api_method().starts_with("send"));
        }
        assert_eq!(FileKind::Sticker.max_file_size(), 512 * 1024);
        assert_eq!(FileKind::Photo.max_files(), 10);
        assert_eq!(FileKind::Voice.max_files(), 1);
    }

    #[test]
    fn test_too_many_files_before_any_check() {
        let paths: Vec<PathBuf> = (0..11).map(|i| PathBuf::from(format!("/missing/{}.png", i))).collect();
        let err = check_files(&paths, FileKind::Photo, false).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::FileCountExceeded { count: 11, max: 10, .. }
        ));
    }

    #[test]
    fn test_mime_enforced_for_photo_not_document() {
        let dir = TempDir::new().unwrap();
        let pdf = write(&dir, "report.pdf", b"%PDF-1.4 fake");

        let err = check_files(&[pdf.clone()], FileKind::Photo, false).unwrap_err();
        match err {
            DispatchError::FileValidationError(problems) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("application/pdf"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let checked = check_files(&[pdf], FileKind::Document, false).unwrap();
        assert_eq!(checked[0].mime_type, "application/pdf");
        assert_eq!(checked[0].file_name, "report.pdf");
    }

    #[test]
    fn test_invalid_files_collected_or_skipped() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "a.png", b"png bytes");
        let empty = write(&dir, "b.png", b"");
        let missing = dir.path().join("c.png");
        let files = vec![good.clone(), empty, missing, dir.path().to_path_buf()];

        match check_files(&files, FileKind::Photo, false).unwrap_err() {
            DispatchError::FileValidationError(problems) => {
                assert_eq!(problems.len(), 3);
                assert!(problems.iter().any(|p| p.contains("File must be not empty")));
                assert!(problems.iter().any(|p| p.contains("File not found")));
                assert!(problems.iter().any(|p| p.contains("Not a file")));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let checked = check_files(&files, FileKind::Photo, true).unwrap();
        assert_eq!(checked.len(), 1);
        assert_eq!(checked[0].path, good);
    }

    #[test]
    fn test_all_invalid_even_when_skipping() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.mp3");
        assert!(matches!(
            check_files(&[missing], FileKind::Audio, true).unwrap_err(),
            DispatchError::FileValidationError(_)
        ));
    }

    #[test]
    fn test_sticker_size_ceiling() {
        let dir = TempDir::new().unwrap();
        let big = write(&dir, "big.webp", &vec![0u8; 512 * 1024 + 1]);
        match check_files(&[big], FileKind::Sticker, false).unwrap_err() {
            DispatchError::FileValidationError(problems) => {
                assert!(problems[0].contains("512.00 KB"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_single_file_body() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "cat.png", b"PNGDATA");
        let files = check_files(&[path], FileKind::Photo, false).unwrap();
        let body = MultipartBody::build(&files, FileKind::Photo).unwrap();

        assert_eq!(body.api_method(), "sendPhoto");
        let content_type = body.content_type();
        let boundary = content_type.split("boundary=").nth(1).unwrap();

        let text = String::from_utf8(body.for_chat(-100123)).unwrap();
        assert!(text.starts_with(&format!("--{}\r\n", boundary)));
        assert!(text.contains("name=\"chat_id\"\r\n\r\n-100123\r\n"));
        assert!(text.contains("name=\"photo\"; filename=\"cat.png\"\r\nContent-Type: image/png\r\n\r\nPNGDATA\r\n"));
        assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_prepare_counts_kept_files() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "a.png", b"png");
        let missing = dir.path().join("missing.png");

        let prepared = PreparedFiles::prepare(&[good.clone(), missing.clone()], FileKind::Photo, true).unwrap();
        assert_eq!(prepared.count(), 1);
        assert_eq!(prepared.kind(), FileKind::Photo);
        assert_eq!(prepared.body().api_method(), "sendPhoto");

        let err = PreparedFiles::prepare(&[good, missing], FileKind::Photo, false).unwrap_err();
        assert!(matches!(err, DispatchError::FileValidationError(_)));
    }

    #[test]
    fn test_media_group_body_shares_file_parts() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.txt", b"first");
        let b = write(&dir, "b.txt", b"second");
        let files = check_files(&[a, b], FileKind::Document, false).unwrap();
        let body = MultipartBody::build(&files, FileKind::Document).unwrap();

        assert_eq!(body.api_method(), "sendMediaGroup");
        let one = String::from_utf8(body.for_chat(1)).unwrap();
        let two = String::from_utf8(body.for_chat(2)).unwrap();
        assert!(one.contains("attach://file0"));
        assert!(one.contains("attach://file1"));
        assert!(one.contains("name=\"file1\"; filename=\"b.txt\""));

        let tail_one = &one[one.find("name=\"media\"").unwrap()..];
        let tail_two = &two[two.find("name=\"media\"").unwrap()..];
        assert_eq!(tail_one, tail_two);
    }
}
