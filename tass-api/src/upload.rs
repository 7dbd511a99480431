//! Multipart uploads.
//!
//! `FileUploadContext` opens every file named in a form map up front and owns
//! the handles until it is dropped, which happens when the dispatching call
//! returns on any path. File parts are streamed from the handles, never read
//! into memory whole.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::Body;
use tokio_util::io::ReaderStream;
use tracing::debug;

use tass_core::constants::media;
use tass_core::error::{TassError, TassResult};

use crate::options::{FileMap, FormPart};

/// Extension to MIME type table used when uploading.
const MIME_TYPES: &[(&str, &str)] = &[
    ("bmp", "image/bmp"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("gif", "image/gif"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("rtf", "application/rtf"),
    ("svg", "image/svg+xml"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("txt", "text/plain"),
    ("webp", "image/webp"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

/// Guess a MIME type from the file extension, defaulting to `application/octet-stream`.
pub fn guess_mime_type(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            MIME_TYPES
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(ext))
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(media::OCTET_STREAM)
}

/// A local file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    path: PathBuf,
}

impl FileUpload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, or an empty string.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn mime_type(&self) -> &'static str {
        guess_mime_type(&self.path)
    }

    /// Form fields for the upload: `file_name` (text) and `file_content` (the file).
    pub fn as_file_map(&self) -> FileMap {
        let name = self.file_name();
        let mut files = FileMap::new();
        files.insert("file_name".to_string(), FormPart::Text(name.clone()));
        files.insert(
            "file_content".to_string(),
            FormPart::File {
                path: self.path.clone(),
                file_name: name,
                mime_type: self.mime_type().to_string(),
            },
        );
        files
    }
}

struct OpenFile {
    field: String,
    file_name: String,
    mime_type: String,
    handle: File,
}

/// Open file handles for one multipart request.
pub struct FileUploadContext {
    texts: Vec<(String, String)>,
    files: Vec<OpenFile>,
}

impl FileUploadContext {
    /// Open every file in `files`. Handles opened before a failure are closed on return.
    pub fn open(files: &FileMap) -> TassResult<Self> {
        let mut context = Self {
            texts: Vec::new(),
            files: Vec::with_capacity(files.len()),
        };

        for (field, part) in files {
            match part {
                FormPart::Text(value) => context.texts.push((field.clone(), value.clone())),
                FormPart::File {
                    path,
                    file_name,
                    mime_type,
                } => {
                    let handle = File::open(path).map_err(|e| {
                        TassError::InvalidRequest(format!(
                            "failed to prepare file upload '{}': {e}",
                            path.display()
                        ))
                    })?;
                    context.files.push(OpenFile {
                        field: field.clone(),
                        file_name: file_name.clone(),
                        mime_type: mime_type.clone(),
                        handle,
                    });
                }
            }
        }

        debug!("opened {} upload handle(s)", context.files.len());
        Ok(context)
    }

    /// Number of file handles currently held.
    pub fn open_handles(&self) -> usize {
        self.files.len()
    }

    /// Build the multipart form from the open handles.
    ///
    /// Each file part streams from a duplicate of its handle, rewound to the
    /// start, so the form can be rebuilt while the context is alive.
    pub fn form(&mut self) -> TassResult<Form> {
        let mut form = Form::new();
        for (field, value) in &self.texts {
            form = form.text(field.clone(), value.clone());
        }
        for file in &self.files {
            let mut handle = file.handle.try_clone()?;
            handle.seek(SeekFrom::Start(0))?;
            let length = handle.metadata()?.len();
            let stream = ReaderStream::new(tokio::fs::File::from_std(handle));

            let part = Part::stream_with_length(Body::wrap_stream(stream), length)
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| TassError::InvalidRequest(format!("invalid mime type '{}': {e}", file.mime_type)))?;
            form = form.part(file.field.clone(), part);
        }
        Ok(form)
    }
}

impl Drop for FileUploadContext {
    fn drop(&mut self) {
        if !self.files.is_empty() {
            debug!("closing {} upload handle(s)", self.files.len());
        }
    }
}
