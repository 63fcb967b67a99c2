//! Turns HTTP requests into upload requests for the assembler

use futures::TryStreamExt;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Body, Request};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::debug;
use upstitch_core::*;
use upstitch_engine::{UploadAssembler, UploadRequest, PARAM_FILE};

/// Parsed request metadata plus the file stream.
///
/// Multipart file fields are staged in the temp directory; the staged file
/// lives as long as the context and is removed when it is dropped.
pub struct RequestContext {
    request: UploadRequest,
    staged: Option<NamedTempFile>,
}

impl RequestContext {
    pub async fn parse(req: Request<Body>, temp_dir: &Path) -> Result<Self> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match content_type {
            Some(ct) if ct.to_ascii_lowercase().starts_with("multipart/") => {
                Self::parse_multipart(req, &ct, temp_dir).await
            }
            _ => Self::parse_raw(req),
        }
    }

    pub fn request(&self) -> &UploadRequest {
        &self.request
    }

    /// Hand the request to the assembler, keeping any staged file until it is done
    pub async fn handle(self, assembler: &UploadAssembler) -> upstitch_core::UploadOutcome {
        let RequestContext { request, staged } = self;
        let outcome = assembler.handle_upload(request).await;
        drop(staged);
        outcome
    }

    fn parse_raw(req: Request<Body>) -> Result<Self> {
        let params = query_params(&req);
        let content_length = req
            .headers()
            .get(CONTENT_LENGTH)
            .map(|value| {
                value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| UploadError::Parse(format!("Invalid Content-Length: {:?}", value)))
            })
            .transpose()?;

        let body = req
            .into_body()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let reader = StreamReader::new(Box::pin(body));

        let mut request = UploadRequest::raw(reader, content_length).with_params(params);
        if let Some(filename) = request.params.get(PARAM_FILE).cloned() {
            request = request.with_filename(filename);
        }

        Ok(RequestContext {
            request,
            staged: None,
        })
    }

    async fn parse_multipart(req: Request<Body>, content_type: &str, temp_dir: &Path) -> Result<Self> {
        let boundary = multer::parse_boundary(content_type).map_err(malformed)?;
        let mut params = query_params(&req);
        let mut multipart = multer::Multipart::new(req.into_body(), boundary);

        let mut file: Option<(NamedTempFile, Option<String>)> = None;
        while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().map(str::to_string);
            let is_file = name.as_deref() == Some(PARAM_FILE) || field.file_name().is_some();

            if is_file && file.is_none() {
                let file_name = field.file_name().map(str::to_string);
                let staged = stage_field(&mut field, temp_dir).await?;
                file = Some((staged, file_name));
            } else if let Some(name) = name {
                let value = field.text().await.map_err(malformed)?;
                params.insert(name, value);
            }
        }

        let (staged, file_name) = file.ok_or_else(|| UploadError::MissingParam(PARAM_FILE.to_string()))?;
        let body = tokio::fs::File::from_std(staged.reopen()?);

        let mut request = UploadRequest::multipart(body).with_params(params);
        if let Some(file_name) = file_name {
            request = request.with_filename(file_name);
        }

        Ok(RequestContext {
            request,
            staged: Some(staged),
        })
    }
}

fn query_params(req: &Request<Body>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

async fn stage_field(field: &mut multer::Field<'_>, temp_dir: &Path) -> Result<NamedTempFile> {
    let staged = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".tmp")
        .tempfile_in(temp_dir)?;

    let mut out = tokio::fs::File::from_std(staged.as_file().try_clone()?);
    let mut staged_bytes = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        out.write_all(&chunk).await?;
        staged_bytes += chunk.len() as u64;
    }
    out.flush().await?;

    debug!("Staged file field at {} ({} bytes)", staged.path().display(), staged_bytes);
    Ok(staged)
}

fn malformed(e: multer::Error) -> UploadError {
    UploadError::Parse(e.to_string())
}
