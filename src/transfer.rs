//! File transfer contract
//!
//! The generic file-transfer mechanism is an external collaborator; only
//! its contract is consumed here. Callers must reject oversized files
//! before a transfer is ever attempted.

use crate::storage::FileDescriptor;
use crate::{Error, Result};

/// Transfer ceiling: 25 MiB
pub const MAX_TRANSFER_BYTES: u64 = 25 * 1024 * 1024;

/// A file handed to the transfer collaborator
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Original file name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type
    pub mime: String,
    /// Raw content
    pub bytes: Vec<u8>,
}

/// External file transfer collaborator
pub trait FileTransfer: Send + Sync {
    /// Upload a file for a conversation, returning its descriptor
    fn upload(
        &self,
        conversation_id: &str,
        upload: FileUpload,
    ) -> impl Future<Output = Result<FileDescriptor>> + Send;
}

/// Reject files above the transfer ceiling
///
/// Local validation only; runs before any transfer call or network I/O.
pub fn ensure_transferable(size: u64) -> Result<()> {
    if size > MAX_TRANSFER_BYTES {
        return Err(Error::FileTooLarge {
            size,
            limit: MAX_TRANSFER_BYTES,
        });
    }
    Ok(())
}
