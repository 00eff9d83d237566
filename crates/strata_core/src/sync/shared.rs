//! # Shared Staging Buffers
//!
//! A CPU-side [`ExternalBufferSink`] whose buffers sit behind a
//! `parking_lot::RwLock`, so a render thread can read the latest published
//! bytes while the frame thread keeps mutating the world.
//!
//! ```text
//! frame thread                      render thread
//! ------------                      -------------
//! world.sync_all(&mut sink)  --->   reader.with_bytes(handle, |bytes| upload(bytes))
//!      (write lock, short)               (read lock, short)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::external::{BufferDescriptor, ExternalBufferSink, ExternalHandle};
use crate::ecs::FragmentId;

/// One staging buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedBuffer {
    /// Fragment name.
    pub label: String,
    /// Fragment mirrored.
    pub fragment: FragmentId,
    /// Bytes per packed slot.
    pub stride: usize,
    /// Contents; the length is the buffer capacity.
    pub bytes: Vec<u8>,
    /// Bumped by every write.
    pub version: u64,
}

type BufferTable = HashMap<ExternalHandle, SharedBuffer>;

/// Writing side. Owned by the thread that runs the syncs.
#[derive(Debug, Default)]
pub struct SharedBufferSink {
    buffers: Arc<RwLock<BufferTable>>,
    next_handle: u64,
}

impl SharedBufferSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A reader over the same buffers. Clone it freely across threads.
    #[must_use]
    pub fn reader(&self) -> SharedBufferReader {
        SharedBufferReader {
            buffers: Arc::clone(&self.buffers),
        }
    }

    /// Live buffer count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    /// Returns `true` if no buffer is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }
}

impl ExternalBufferSink for SharedBufferSink {
    fn create_buffer(&mut self, descriptor: &BufferDescriptor, bytes: &[u8]) -> ExternalHandle {
        let handle = ExternalHandle(self.next_handle);
        self.next_handle += 1;

        let mut contents = vec![0u8; descriptor.capacity.max(bytes.len())];
        contents[..bytes.len()].copy_from_slice(bytes);
        self.buffers.write().insert(
            handle,
            SharedBuffer {
                label: descriptor.label.clone(),
                fragment: descriptor.fragment,
                stride: descriptor.stride,
                bytes: contents,
                version: 1,
            },
        );
        handle
    }

    fn update_buffer(&mut self, handle: ExternalHandle, offset: usize, bytes: &[u8]) {
        let mut buffers = self.buffers.write();
        let Some(buffer) = buffers.get_mut(&handle) else {
            tracing::warn!("Update of released staging buffer {:?} ignored", handle);
            return;
        };
        let end = offset + bytes.len();
        if end > buffer.bytes.len() {
            buffer.bytes.resize(end, 0);
        }
        buffer.bytes[offset..end].copy_from_slice(bytes);
        buffer.version += 1;
    }

    fn release_buffer(&mut self, handle: ExternalHandle) {
        self.buffers.write().remove(&handle);
    }
}

/// Reading side of a [`SharedBufferSink`].
#[derive(Clone, Debug)]
pub struct SharedBufferReader {
    buffers: Arc<RwLock<BufferTable>>,
}

impl SharedBufferReader {
    /// Runs `f` on a buffer's bytes under the read lock.
    pub fn with_bytes<R>(&self, handle: ExternalHandle, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.buffers.read().get(&handle).map(|buffer| f(&buffer.bytes))
    }

    /// Copy of a buffer.
    #[must_use]
    pub fn snapshot(&self, handle: ExternalHandle) -> Option<SharedBuffer> {
        self.buffers.read().get(&handle).cloned()
    }

    /// Write version of a buffer.
    #[must_use]
    pub fn version(&self, handle: ExternalHandle) -> Option<u64> {
        self.buffers.read().get(&handle).map(|buffer| buffer.version)
    }

    /// Live handles, ascending.
    #[must_use]
    pub fn handles(&self) -> Vec<ExternalHandle> {
        let mut handles: Vec<_> = self.buffers.read().keys().copied().collect();
        handles.sort();
        handles
    }
}
