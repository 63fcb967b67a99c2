//! On-disk storage for upload parts and assembled files

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use ulid::Ulid;
use upstitch_core::*;

/// Upload directory holding stored parts and assembled files.
///
/// Part order is encoded in the file name (`<id>_<index:05>`), so no
/// manifest is kept next to the parts.
#[derive(Clone, Debug)]
pub struct PartStore {
    dir: Arc<PathBuf>,
}

impl PartStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        PartStore {
            dir: Arc::new(dir.as_ref().to_path_buf()),
        }
    }

    /// Create a store over a temporary directory for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let store = Self::new(temp_dir.path());
        Ok((store, temp_dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn part_path(&self, upload_id: &UploadId, index: u32) -> PathBuf {
        self.dir.join(upload_id.part_file_name(index))
    }

    pub fn file_path(&self, file_name: &FileName) -> PathBuf {
        self.dir.join(file_name.as_str())
    }

    /// Write a part, replacing any earlier part with the same index.
    ///
    /// The stream lands in a staging file first and is renamed into place,
    /// so a merge running concurrently sees either the old or the new part.
    pub async fn write_part<R>(
        &self,
        upload_id: &UploadId,
        index: u32,
        data: &mut R,
    ) -> Result<StoredPart>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.part_path(upload_id, index);
        let staging = self.dir.join(format!(
            "{}.{}.partial",
            upload_id.part_file_name(index),
            Ulid::new()
        ));

        let len = match copy_to_file(data, &staging).await {
            Ok(len) => len,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        debug!("Stored part {} of upload {} ({} bytes)", index, upload_id, len);

        Ok(StoredPart {
            upload_id: upload_id.clone(),
            index,
            path,
            len,
        })
    }

    /// List the stored parts of an upload in index order
    pub async fn list_parts(&self, upload_id: &UploadId) -> Result<Vec<StoredPart>> {
        let mut entries = match fs::read_dir(self.dir.as_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut parts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(index) = file_name.to_str().and_then(|n| upload_id.parse_part_index(n)) else {
                continue;
            };

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            parts.push(StoredPart {
                upload_id: upload_id.clone(),
                index,
                path: entry.path(),
                len: metadata.len(),
            });
        }

        parts.sort_by_key(|part| part.index);
        Ok(parts)
    }

    pub async fn has_part(&self, upload_id: &UploadId, index: u32) -> Result<bool> {
        match fs::metadata(self.part_path(upload_id, index)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Append parts, in the given order, to the named file.
    ///
    /// The file is opened in append mode and never truncated. A part that
    /// yields fewer bytes than its listed length fails the merge; parts
    /// appended before it stay in the file.
    pub async fn merge_into(&self, file_name: &FileName, parts: &[StoredPart]) -> Result<PathBuf> {
        let output_path = self.file_path(file_name);
        let mut output = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&output_path)
            .await?;

        for part in parts {
            let bytes = read_part(part).await?;
            output.write_all(&bytes).await?;
            output.flush().await?;

            debug!(
                "Appended part {} of upload {} to {} ({} bytes)",
                part.index,
                part.upload_id,
                output_path.display(),
                bytes.len()
            );
        }

        Ok(output_path)
    }

    /// Remove every stored part of an upload, returning how many were removed
    pub async fn delete_parts(&self, upload_id: &UploadId) -> Result<usize> {
        let mut removed = 0;
        for part in self.list_parts(upload_id).await? {
            match fs::remove_file(&part.path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Deleted {} parts of upload {}", removed, upload_id);
        Ok(removed)
    }

    /// Write a whole file into the upload directory, replacing any existing one
    pub async fn write_file<R>(&self, file_name: &FileName, data: &mut R) -> Result<(PathBuf, u64)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.file_path(file_name);
        let len = copy_to_file(data, &path).await?;
        debug!("Wrote {} ({} bytes)", path.display(), len);
        Ok((path, len))
    }
}

async fn copy_to_file<R>(data: &mut R, path: &Path) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = File::create(path).await?;
    let len = tokio::io::copy(data, &mut file).await?;
    file.flush().await?;
    Ok(len)
}

async fn read_part(part: &StoredPart) -> Result<Vec<u8>> {
    let file = File::open(&part.path).await?;

    let mut bytes = Vec::with_capacity(part.len as usize);
    file.take(part.len).read_to_end(&mut bytes).await?;

    let read = bytes.len() as u64;
    if read < part.len {
        warn!(
            "Short read on {}: {} of {} bytes",
            part.path.display(),
            read,
            part.len
        );
        return Err(UploadError::Merge {
            part: part.upload_id.part_file_name(part.index),
            read,
            expected: part.len,
        });
    }

    Ok(bytes)
}
