//! Per-request upload handling: whole files, parts and merges

use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use tokio::io::AsyncRead;
use tracing::{debug, error, info};
use upstitch_core::*;
use crate::{MergeGuard, MergeState, PartStore, SizeVerifier, UploadConfig};

/// Index of the part carried by this request
pub const PARAM_PART_INDEX: &str = "qqpartnum";
/// Number of parts in the whole upload
pub const PARAM_TOTAL_PARTS: &str = "qqtotalparts";
/// Upload identifier shared by every part
pub const PARAM_UPLOAD_ID: &str = "qquuid";
/// Percent-encoded original file name sent with multipart parts
pub const PARAM_FILE_NAME: &str = "qqfilename";
/// Filename indicator of a raw request, and the file field of a multipart one
pub const PARAM_FILE: &str = "qqfile";
/// Test hook: when `true`, a handled request still reports a failure
pub const PARAM_GENERATE_ERROR: &str = "generateError";

const GENERATED_ERROR: &str = "Generated error";

/// How the request body was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Body is the file itself; `Content-Length` declares its size when present
    Raw { content_length: Option<u64> },
    /// File came from a form field; the declared length includes framing
    Multipart,
}

/// Everything the assembler needs from one HTTP request
pub struct UploadRequest {
    pub submission: Submission,
    pub params: HashMap<String, String>,
    /// The request's own filename indicator, if any
    pub filename: Option<String>,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

impl UploadRequest {
    pub fn raw<R>(body: R, content_length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(Submission::Raw { content_length }, body)
    }

    pub fn multipart<R>(body: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(Submission::Multipart, body)
    }

    fn new<R>(submission: Submission, body: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        UploadRequest {
            submission,
            params: HashMap::new(),
            filename: None,
            body: Box::new(body),
        }
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    fn is_multipart(&self) -> bool {
        self.submission == Submission::Multipart
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| UploadError::MissingParam(name.to_string()))
    }
}

/// Chunking metadata carried by a part request
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkParams {
    part: PartDescriptor,
    file_name: FileName,
}

/// Turns upload requests into files in the upload directory
#[derive(Clone, Debug)]
pub struct UploadAssembler {
    config: UploadConfig,
    store: PartStore,
    guard: MergeGuard,
}

impl UploadAssembler {
    /// Create an assembler, creating its directories if needed
    pub fn new(config: UploadConfig) -> Result<Self> {
        config.ensure_dirs()?;

        Ok(UploadAssembler {
            store: PartStore::new(&config.upload_dir),
            guard: MergeGuard::new(config.assembled_history),
            config,
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn store(&self) -> &PartStore {
        &self.store
    }

    pub fn guard(&self) -> &MergeGuard {
        &self.guard
    }

    /// Handle one upload request; every failure becomes a failed outcome
    pub async fn handle_upload(&self, request: UploadRequest) -> UploadOutcome {
        let generate_error = request
            .param(PARAM_GENERATE_ERROR)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let result = self.receive(request).await;
        if let Err(e) = &result {
            error!("Problem handling upload request: {}", e);
        }

        match result {
            Ok(()) if generate_error => UploadOutcome::failure(GENERATED_ERROR),
            result => UploadOutcome::from(result),
        }
    }

    async fn receive(&self, mut request: UploadRequest) -> Result<()> {
        let expected_size = match request.submission {
            Submission::Raw { content_length } => content_length,
            Submission::Multipart => None,
        };

        match chunk_params(&request)? {
            Some(chunk) => self.receive_part(chunk, &mut request.body).await,
            None => {
                let file_name = file_name_for(&request, false)?;
                self.receive_whole(&file_name, expected_size, &mut request.body).await
            }
        }
    }

    async fn receive_whole<R>(
        &self,
        file_name: &FileName,
        expected_size: Option<u64>,
        body: &mut R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (path, written) = self.store.write_file(file_name, body).await?;

        if let Some(expected) = expected_size {
            SizeVerifier::verify(&path, expected).await?;
        }

        info!("Received {} ({} bytes)", file_name, written);
        Ok(())
    }

    async fn receive_part<R>(&self, chunk: ChunkParams, body: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let ChunkParams { part, file_name } = chunk;
        let upload_id = &part.upload_id;

        if self.guard.state(upload_id) == MergeState::Assembled {
            info!(
                "Upload {} already assembled; ignoring part {}",
                upload_id, part.index
            );
            return Ok(());
        }

        self.store.write_part(upload_id, part.index, body).await?;

        let last_stored =
            part.is_last() || self.store.has_part(upload_id, part.last_index()).await?;
        if !last_stored {
            return Ok(());
        }

        // Waiting here means every part renamed before the claim is listed below
        let claim = self.guard.claim(upload_id).await;
        if claim.is_assembled() {
            let removed = self.store.delete_parts(upload_id).await?;
            debug!(
                "Upload {} assembled while part {} was stored; removed {} late parts",
                upload_id, part.index, removed
            );
            return Ok(());
        }

        let parts = self.store.list_parts(upload_id).await?;
        if let Some(stray) = parts.iter().find(|p| p.index >= part.total) {
            return Err(UploadError::InvalidPart {
                index: stray.index,
                total: part.total,
            });
        }

        let complete = parts.len() == part.total as usize
            && parts.iter().zip(0u32..).all(|(p, i)| p.index == i);
        if !complete {
            info!(
                "Upload {}: {} of {} parts stored, waiting for the rest",
                upload_id,
                parts.len(),
                part.total
            );
            return Ok(());
        }

        for stored in &parts {
            self.store
                .merge_into(&file_name, std::slice::from_ref(stored))
                .await?;
        }
        claim.mark_assembled();
        self.store.delete_parts(upload_id).await?;

        info!(
            "Assembled upload {} into {} ({} parts)",
            upload_id, file_name, part.total
        );
        Ok(())
    }
}

fn chunk_params(request: &UploadRequest) -> Result<Option<ChunkParams>> {
    let Some(part_num) = request.param(PARAM_PART_INDEX) else {
        return Ok(None);
    };

    let index = parse_count(PARAM_PART_INDEX, part_num)?;
    let total = parse_count(PARAM_TOTAL_PARTS, request.required(PARAM_TOTAL_PARTS)?)?;
    let upload_id = UploadId::new(request.required(PARAM_UPLOAD_ID)?)?;

    Ok(Some(ChunkParams {
        part: PartDescriptor::new(upload_id, index, total)?,
        file_name: file_name_for(request, true)?,
    }))
}

/// Multipart parts name the file in `qqfilename`; everything else uses the
/// request's own indicator and falls back to `qqfilename`.
fn file_name_for(request: &UploadRequest, chunked: bool) -> Result<FileName> {
    if chunked && request.is_multipart() {
        return decode_file_name(request.required(PARAM_FILE_NAME)?);
    }

    match (&request.filename, request.param(PARAM_FILE_NAME)) {
        (Some(name), _) => FileName::new(name),
        (None, Some(encoded)) => decode_file_name(encoded),
        (None, None) => Err(UploadError::MissingParam(PARAM_FILE.to_string())),
    }
}

/// Form-style decoding: `+` is a space, `%2B` a literal plus
fn decode_file_name(encoded: &str) -> Result<FileName> {
    let spaced = encoded.replace('+', " ");
    let decoded = percent_decode_str(&spaced)
        .decode_utf8()
        .map_err(|e| UploadError::Parse(format!("{} is not valid UTF-8: {}", PARAM_FILE_NAME, e)))?;
    FileName::new(&decoded)
}

fn parse_count(name: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| UploadError::Parse(format!("Invalid {}: '{}'", name, value)))
}
