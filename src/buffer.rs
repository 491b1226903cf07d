use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;

use crate::error::{PortError, Status};

bitflags::bitflags! {
    /// Per-buffer flags (subset relevant to the port core; codec-specific
    /// flags live above this layer).
    #[derive(Default)]
    pub struct BufferFlags: u32 {
        const FRAME_END            = 0x01;
        const KEYFRAME              = 0x02;
        const TRANSMISSION_FAILED   = 0x04;
        const EOS                   = 0x08;
    }
}

/// Marks a buffer as carrying an event rather than payload data.
///
/// `0` means "this is a normal data buffer"; any other value is an event
/// command such as [`EVENT_FORMAT_CHANGED`].
pub type EventCmd = u32;

pub const EVENT_FORMAT_CHANGED: EventCmd = 0x6265_6766; // ascii 'bfcg', arbitrary but stable
pub const EVENT_ERROR: EventCmd = 0x6572_7220; // ascii 'err '
pub const EVENT_PARAMETER_CHANGED: EventCmd = 0x7061_7263; // ascii 'parc'

/// A buffer header: the unit of exchange between ports.
///
/// Unlike the C original this owns its payload directly (`Vec<u8>`) rather
/// than a pointer into pool-managed memory; pools still own the headers'
/// lifecycle (see [`BufferPool`]), just not raw bytes underneath Rust's back.
pub struct Buffer {
    pub cmd: EventCmd,
    pub flags: BufferFlags,
    pub length: usize,
    pub offset: usize,
    pub pts: i64,
    pub dts: i64,
    data: Option<Vec<u8>>,
    pool: Option<Weak<BufferPool>>,
}

impl Buffer {
    /// A buffer with no backing payload memory, suitable for `PASSTHROUGH`
    /// ports where references are forwarded rather than copied.
    pub fn passthrough() -> Buffer {
        Buffer {
            cmd: 0,
            flags: BufferFlags::empty(),
            length: 0,
            offset: 0,
            pts: 0,
            dts: 0,
            data: None,
            pool: None,
        }
    }

    pub fn with_capacity(size: usize) -> Buffer {
        Buffer {
            cmd: 0,
            flags: BufferFlags::empty(),
            length: 0,
            offset: 0,
            pts: 0,
            dts: 0,
            data: Some(vec![0u8; size]),
            pool: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len())
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn is_event(&self) -> bool {
        self.cmd != 0
    }

    /// Resets the header fields a buffer carries between hand-offs, as
    /// `connected_pool_cb` does before resubmitting a consumed buffer
    /// upstream (spec §4.7).
    pub fn reset_header(&mut self) {
        self.cmd = 0;
        self.length = 0;
        self.offset = 0;
        self.flags = BufferFlags::empty();
        self.pts = 0;
        self.dts = 0;
    }

    /// Releases this buffer back to the pool it was drawn from, if any.
    ///
    /// Consuming `self` mirrors the C API's one-shot `mmal_buffer_header_release`:
    /// once released, the caller no longer has the buffer.
    pub fn release(mut self) {
        if let Some(pool) = self.pool.take().and_then(|p| p.upgrade()) {
            pool.reclaim(self);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("cmd", &self.cmd)
            .field("flags", &self.flags)
            .field("length", &self.length)
            .field("offset", &self.offset)
            .field("capacity", &self.capacity())
            .finish()
    }
}

type PoolCallback = dyn Fn(&Arc<BufferPool>, Buffer) -> Option<Buffer> + Send + Sync;

struct PoolState {
    free: Vec<Buffer>,
    callback: Option<Box<PoolCallback>>,
}

/// A fixed-size set of pre-allocated buffer headers backed by a free-list.
///
/// This is the "buffer-header and pool allocator" the specification treats
/// as an external collaborator (consumed, not owned, by the port core); it's
/// implemented here so the port engine is runnable and testable end to end.
pub struct BufferPool {
    state: Mutex<PoolState>,
    buffer_size: usize,
}

impl BufferPool {
    /// `pool.create(port, n, size)`: allocates `count` buffers of `size`
    /// bytes and returns the pool holding them.
    pub fn create(count: u32, size: usize) -> Arc<BufferPool> {
        let free = (0..count).map(|_| Buffer::with_capacity(size)).collect();
        let pool = Arc::new(BufferPool {
            state: Mutex::new(PoolState { free, callback: None }),
            buffer_size: size,
        });
        // Stamp each buffer with a weak back-reference so `Buffer::release`
        // can find its way home.
        let mut state = pool.state.lock();
        for buf in state.free.iter_mut() {
            buf.pool = Some(Arc::downgrade(&pool));
        }
        drop(state);
        pool
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn len(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `pool.queue.get()`: pops a free buffer, or `None` if the pool is
    /// exhausted. Never blocks.
    pub fn get(&self) -> Option<Buffer> {
        self.state.lock().free.pop()
    }

    /// `pool.callback_set(fn, userdata)`. Rust closures capture their own
    /// state, so there's no separate userdata parameter to thread through.
    ///
    /// This follows the upstream boolean convention ("return non-success iff
    /// the buffer should remain in the pool") but spells it as
    /// `Option<Buffer>` since Rust ownership makes that the honest
    /// signature: `Some(buffer)` hands the buffer back for the pool to
    /// requeue (the "keep in pool" case); `None` means the callback already
    /// disposed of it itself (typically resubmitting it upstream), and the
    /// pool must not also requeue it.
    pub fn callback_set<F>(&self, callback: F)
    where
        F: Fn(&Arc<BufferPool>, Buffer) -> Option<Buffer> + Send + Sync + 'static,
    {
        self.state.lock().callback = Some(Box::new(callback));
    }

    pub fn callback_clear(&self) {
        self.state.lock().callback = None;
    }

    /// Called by `Buffer::release`. Not part of the external interface.
    fn reclaim(self: &Arc<Self>, buffer: Buffer) {
        // Take the callback out before invoking it: we must not hold the
        // pool lock while running arbitrary user code, since it may itself
        // call back into the pool (e.g. `get()` a buffer to resubmit).
        let cb_present = self.state.lock().callback.take();

        let remaining = match cb_present {
            Some(cb) => {
                let result = cb(self, buffer);
                self.state.lock().callback = Some(cb);
                result
            }
            None => Some(buffer),
        };

        if let Some(buffer) = remaining {
            self.state.lock().free.push(buffer);
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("free", &self.len())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

pub fn enomem(message: &'static str) -> PortError {
    PortError::new(message, Status::Enomem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_drains_and_exhausts() {
        let pool = BufferPool::create(2, 16);
        assert!(pool.get().is_some());
        assert!(pool.get().is_some());
        assert!(pool.get().is_none());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn release_returns_to_pool_without_callback() {
        let pool = BufferPool::create(1, 16);
        let buf = pool.get().unwrap();
        assert_eq!(pool.len(), 0);
        buf.release();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn release_with_callback_consumes_the_buffer() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let seen = Arc::new(AtomicUsize::new(0));
        let pool = BufferPool::create(1, 16);
        let seen2 = seen.clone();
        pool.callback_set(move |_pool, _buf| {
            seen2.fetch_add(1, Ordering::SeqCst);
            None // pretend we resubmitted it elsewhere
        });

        let buf = pool.get().unwrap();
        buf.release();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 0, "callback consumed the buffer: it must not be requeued");
    }

    #[test]
    fn release_with_callback_returning_true_requeues() {
        let pool = BufferPool::create(1, 16);
        pool.callback_set(|_pool, buf| Some(buf));

        let buf = pool.get().unwrap();
        buf.release();

        assert_eq!(pool.len(), 1);
    }
}
