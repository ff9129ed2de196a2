//! `multipart/form-data` body parsing, wrapping the `multer` crate.
//!
//! Grounded on `original_source/roll/forms.py` (multipart fields split into
//! plain form values vs. uploaded files, keyed by field name) and on
//! `other_examples/manifests/{salvo-rs-salvo,tokio-rs-axum}` both depending
//! on `multer` for this exact job — the teacher never parses bodies itself.

use crate::error::HttpError;
use crate::multidict::Multidict;
use bytes::Bytes;
use std::collections::HashMap;

/// One uploaded file from a multipart field, per `original_source/roll/forms.py::File`.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field_name: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct Files {
    entries: HashMap<String, Vec<UploadedFile>>,
}

impl Files {
    pub fn get(&self, field: &str) -> Option<&UploadedFile> {
        self.entries.get(field).and_then(|v| v.first())
    }

    pub fn get_all(&self, field: &str) -> Vec<&UploadedFile> {
        self.entries.get(field).map(|v| v.iter().collect()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits a fully-loaded multipart body into plain fields ([`Multidict`])
/// and file fields ([`Files`]), matching the original's `parse_multipart`
/// which dispatches each part by presence of a `filename` on its
/// `Content-Disposition`.
pub async fn parse_multipart(body: Bytes, boundary: &str) -> Result<(Multidict, Files), HttpError> {
    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body) });
    let mut multipart = ::multer::Multipart::new(stream, boundary);

    let mut form = Multidict::new();
    let mut files = Files::default();

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| HttpError::bad_request(format!("Invalid multipart body: {e}")))?;
        let Some(mut field) = field else { break };

        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|m| m.to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| HttpError::bad_request(format!("Invalid multipart body: {e}")))?
        {
            data.extend_from_slice(&chunk);
        }

        match filename {
            Some(filename) => {
                files.entries.entry(name.clone()).or_default().push(UploadedFile {
                    field_name: name,
                    filename,
                    content_type,
                    data: Bytes::from(data),
                });
            }
            None => {
                let value = String::from_utf8_lossy(&data).into_owned();
                form.push(name, value);
            }
        }
    }

    Ok((form, files))
}

/// Extracts the boundary token from a `Content-Type: multipart/form-data;
/// boundary=...` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_text_field_and_file_field() {
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nfoo\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nHELLO\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let (form, files) = parse_multipart(Bytes::from(body), boundary).await.unwrap();
        assert_eq!(form.get("name"), Some("foo"));
        let f = files.get("f").unwrap();
        assert_eq!(f.filename, "a.txt");
        assert_eq!(f.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&f.data[..], b"HELLO");
    }

    #[test]
    fn extracts_boundary() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=XBOUNDARY"),
            Some("XBOUNDARY".to_string())
        );
    }
}
