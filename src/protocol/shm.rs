//! Shared-memory pools and buffers. A pool is a client-donated fd mapped
//! read-only; buffers are validated windows into it. The C-style ref count
//! ("pool dies when the pool resource *and* the last buffer are gone") is
//! modeled with `Arc`: the `wl_shm_pool` user data holds one strong
//! reference and every `wl_buffer` created from it holds another, so the
//! mapping is unmapped and the fd closed exactly once, on the last drop.

use std::ffi::c_void;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex};

use rustix::mm::{mmap, mremap, munmap, MapFlags, MremapFlags, ProtFlags};
use wayland_server::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, Resource};

use crate::state::State;

/// A mapped pool. `resize` may move the mapping, so anything reading pixels
/// goes through [`ShmPool::bytes`] under the lock rather than caching the
/// base pointer.
pub struct ShmPool {
    ptr: *mut c_void,
    size: usize,
    _fd: OwnedFd,
}

// The mapping is read-only and only touched from the event-loop thread; the
// raw pointer is what keeps the type from deriving these.
unsafe impl Send for ShmPool {}

impl ShmPool {
    pub fn new(fd: OwnedFd, size: usize) -> io::Result<Self> {
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ,
                MapFlags::SHARED,
                &fd,
                0,
            )
        }
        .map_err(io::Error::from)?;

        Ok(Self { ptr, size, _fd: fd })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Grow the mapping in place or by moving it. Shrinking is refused by
    /// the protocol layer before this is called.
    pub fn resize(&mut self, new_size: usize) -> io::Result<()> {
        let ptr = unsafe { mremap(self.ptr, self.size, new_size, MremapFlags::MAYMOVE) }
            .map_err(io::Error::from)?;
        self.ptr = ptr;
        self.size = new_size;
        Ok(())
    }

    /// Borrow `len` bytes at `offset`, or `None` when out of bounds.
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        if offset.checked_add(len)? > self.size {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts((self.ptr as *const u8).add(offset), len) })
    }
}

impl Drop for ShmPool {
    fn drop(&mut self) {
        if let Err(err) = unsafe { munmap(self.ptr, self.size) } {
            tracing::warn!("munmap of shm pool failed: {err}");
        }
    }
}

pub type PoolHandle = Arc<Mutex<ShmPool>>;

/// User data of every `wl_buffer`: geometry plus a strong reference that
/// keeps the pool mapped for as long as the buffer exists.
pub struct ShmBufferData {
    pub pool: PoolHandle,
    pub offset: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: wl_shm::Format,
}

pub(crate) enum BufferCheck {
    InvalidDimensions,
    InvalidStride,
    OutOfBounds,
}

/// The creation-time invariants: positive size, `stride >= width * 4`,
/// `offset + stride * height <= pool size`. All arithmetic in i64 so a
/// hostile client cannot overflow its way past the bounds check.
pub(crate) fn check_buffer(
    offset: i32,
    width: i32,
    height: i32,
    stride: i32,
    pool_size: usize,
) -> Result<(), BufferCheck> {
    if width <= 0 || height <= 0 {
        return Err(BufferCheck::InvalidDimensions);
    }
    if offset < 0 || stride < 0 || (stride as i64) < (width as i64) * 4 {
        return Err(BufferCheck::InvalidStride);
    }
    if offset as i64 + stride as i64 * height as i64 > pool_size as i64 {
        return Err(BufferCheck::OutOfBounds);
    }
    Ok(())
}

impl Dispatch<wl_shm::WlShm, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm::Request::CreatePool { id, fd, size } => {
                if size <= 0 {
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!("invalid pool size {size}"),
                    );
                    return;
                }
                match ShmPool::new(fd, size as usize) {
                    Ok(pool) => {
                        data_init.init(id, Arc::new(Mutex::new(pool)));
                    }
                    Err(err) => {
                        resource.post_error(
                            wl_shm::Error::InvalidFd,
                            format!("mmap failed: {err}"),
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, PoolHandle> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        data: &PoolHandle,
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let format = match format.into_result() {
                    Ok(f @ (wl_shm::Format::Argb8888 | wl_shm::Format::Xrgb8888)) => f,
                    Ok(other) => {
                        resource.post_error(
                            wl_shm::Error::InvalidFormat,
                            format!("unsupported format {other:?}"),
                        );
                        return;
                    }
                    Err(_) => {
                        resource.post_error(wl_shm::Error::InvalidFormat, "unknown format");
                        return;
                    }
                };

                let pool_size = data.lock().unwrap().size();
                if let Err(check) = check_buffer(offset, width, height, stride, pool_size) {
                    let message = match check {
                        BufferCheck::InvalidDimensions => {
                            format!("invalid buffer size {width}x{height}")
                        }
                        BufferCheck::InvalidStride => {
                            format!("invalid stride {stride} for width {width}")
                        }
                        BufferCheck::OutOfBounds => {
                            format!("buffer extends past the end of the pool ({pool_size} bytes)")
                        }
                    };
                    resource.post_error(wl_shm::Error::InvalidStride, message);
                    return;
                }

                data_init.init(
                    id,
                    ShmBufferData {
                        pool: data.clone(),
                        offset,
                        width,
                        height,
                        stride,
                        format,
                    },
                );
            }
            wl_shm_pool::Request::Resize { size } => {
                if size <= 0 {
                    resource.post_error(
                        wl_shm::Error::InvalidFd,
                        format!("invalid pool size {size}"),
                    );
                    return;
                }
                let mut pool = data.lock().unwrap();
                if (size as usize) < pool.size() {
                    resource.post_error(wl_shm::Error::InvalidFd, "shrinking a pool is not allowed");
                    return;
                }
                if let Err(err) = pool.resize(size as usize) {
                    resource.post_error(wl_shm::Error::InvalidFd, format!("mremap failed: {err}"));
                }
            }
            wl_shm_pool::Request::Destroy => {
                // The resource's strong reference drops with its user data;
                // outstanding buffers keep the mapping alive.
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ShmBufferData> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        request: wl_buffer::Request,
        _data: &ShmBufferData,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_buffer::Request::Destroy => {}
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pool_fd(size: usize) -> OwnedFd {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![0u8; size]).unwrap();
        OwnedFd::from(file)
    }

    #[test]
    fn should_map_and_read_a_pool() {
        let pool = ShmPool::new(pool_fd(4096), 4096).unwrap();
        assert_eq!(pool.size(), 4096);
        assert_eq!(pool.bytes(0, 4096).unwrap().len(), 4096);
        assert_eq!(pool.bytes(4000, 96).unwrap().len(), 96);
        assert!(pool.bytes(4000, 97).is_none());
    }

    #[test]
    fn should_grow_a_pool_in_place_or_by_moving() {
        let fd = pool_fd(8192);
        let mut pool = ShmPool::new(fd, 4096).unwrap();
        pool.resize(8192).unwrap();
        assert_eq!(pool.size(), 8192);
        assert!(pool.bytes(0, 8192).is_some());
    }

    #[test]
    fn should_release_the_mapping_on_last_reference() {
        let pool = Arc::new(Mutex::new(ShmPool::new(pool_fd(4096), 4096).unwrap()));
        let buffer_ref = pool.clone();
        drop(pool); // pool resource gone, buffer keeps it alive
        assert_eq!(buffer_ref.lock().unwrap().size(), 4096);
        drop(buffer_ref); // unmapped here, exactly once
    }

    #[test]
    fn should_accept_a_tight_buffer() {
        // 200x200 ARGB8888 at offset 0 exactly fills an 160000-byte pool.
        assert!(check_buffer(0, 200, 200, 800, 160_000).is_ok());
    }

    #[test]
    fn should_reject_undersized_stride() {
        assert!(matches!(
            check_buffer(0, 200, 200, 796, 160_000),
            Err(BufferCheck::InvalidStride)
        ));
    }

    #[test]
    fn should_reject_buffers_past_the_pool_end() {
        assert!(matches!(
            check_buffer(4, 200, 200, 800, 160_000),
            Err(BufferCheck::OutOfBounds)
        ));
        assert!(matches!(
            check_buffer(0, 200, 201, 800, 160_000),
            Err(BufferCheck::OutOfBounds)
        ));
    }

    #[test]
    fn should_reject_nonpositive_dimensions_and_offsets() {
        assert!(matches!(
            check_buffer(0, 0, 200, 800, 160_000),
            Err(BufferCheck::InvalidDimensions)
        ));
        assert!(matches!(
            check_buffer(0, 200, -1, 800, 160_000),
            Err(BufferCheck::InvalidDimensions)
        ));
        assert!(matches!(
            check_buffer(-4, 200, 200, 800, 160_000),
            Err(BufferCheck::InvalidStride)
        ));
    }

    #[test]
    fn should_not_overflow_on_hostile_geometry() {
        assert!(check_buffer(0, i32::MAX, i32::MAX, i32::MAX, 4096).is_err());
    }
}
