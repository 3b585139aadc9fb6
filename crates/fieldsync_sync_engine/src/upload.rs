//! Background upload collaborator.

use crate::error::SyncResult;
use async_trait::async_trait;

/// The engine that uploads image files for `ImageMetadata` records.
///
/// It shares the `Queued`/`Failed` vocabulary with the record sync but runs
/// its own queue. The coordinator resumes it when connectivity returns.
#[async_trait]
pub trait UploadEngine: Send + Sync {
    /// Starts or resumes every pending upload. Returns how many were started.
    async fn sync_pending_uploads(&self) -> SyncResult<usize>;

    /// Requeues failed uploads and starts them. Returns how many.
    async fn retry_failed_uploads(&self) -> SyncResult<usize>;

    /// Aborts the upload with `upload_id`. Returns false if none was running.
    fn cancel_upload(&self, upload_id: &str) -> bool;
}
