// Shared fixtures: in-memory directory, recording transfer, clock plumbing

use crate::clock::{ManualClock, SharedClock};
use crate::identity::{Identity, UserDirectory};
use crate::storage::FileDescriptor;
use crate::transfer::{FileTransfer, FileUpload};
use crate::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn identity(id: &str, name: &str) -> Identity {
    Identity {
        id: id.to_string(),
        display_name: name.to_string(),
        avatar_url: None,
        online: false,
        last_seen: None,
    }
}

/// In-memory user directory with a fixed user set
pub struct MemoryDirectory {
    users: Vec<Identity>,
    current: Option<Identity>,
}

impl MemoryDirectory {
    pub fn new(users: Vec<Identity>) -> Self {
        Self {
            users,
            current: None,
        }
    }

    pub fn with_current(mut self, current: Identity) -> Self {
        self.current = Some(current);
        self
    }
}

impl UserDirectory for MemoryDirectory {
    fn resolve_by_name(&self, name: &str) -> Option<Identity> {
        self.users.iter().find(|u| u.display_name == name).cloned()
    }

    fn resolve_by_id(&self, id: &str) -> Option<Identity> {
        self.users.iter().find(|u| u.id == id).cloned()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current.clone()
    }
}

/// File transfer double that counts upload calls
#[derive(Default)]
pub struct RecordingTransfer {
    pub uploads: AtomicUsize,
}

impl RecordingTransfer {
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

impl FileTransfer for RecordingTransfer {
    fn upload(
        &self,
        conversation_id: &str,
        upload: FileUpload,
    ) -> impl Future<Output = Result<FileDescriptor>> + Send {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let conversation_id = conversation_id.to_string();
        async move {
            Ok(FileDescriptor {
                name: upload.name.clone(),
                size: upload.size,
                mime: upload.mime,
                url: format!("https://files.test/{}/{}", conversation_id, upload.name),
            })
        }
    }
}

/// Manual clock plus the shared handle the trackers take
pub fn manual_clock(start_ms: i64) -> (ManualClock, SharedClock) {
    let clock = ManualClock::new(start_ms);
    let shared: SharedClock = Arc::new(clock.clone());
    (clock, shared)
}
