//! POSIX shared memory frame segment.
//!
//! Segment layout (one mapping per process):
//!
//! ```text
//! +-------------------------------+---------------------------+
//! | SegmentHeader                 | data area (header.size B) |
//! |  size: u32                    |  one raw frame            |
//! |  mutex: pthread_mutex_t       |                           |
//! |  condition: pthread_cond_t    |                           |
//! +-------------------------------+---------------------------+
//! ```
//!
//! Both the mutex and the condition variable are `PTHREAD_PROCESS_SHARED`.
//! The producer writes a frame under the mutex and broadcasts the condition;
//! consumers wait on the condition, then lock to read.
//!
//! The header carries no frame counter, so `wait_for_next` has no predicate to
//! re-check: a spurious wakeup hands the previous frame to the loop again.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::FromRawFd;
use std::ptr::addr_of_mut;

use anyhow::{anyhow, Context, Result};
use memmap2::MmapMut;

use super::{normalize_segment_name, FrameSource};
use crate::frame::{FrameGeometry, FrameView};

#[repr(C)]
struct SegmentHeader {
    size: u32,
    mutex: libc::pthread_mutex_t,
    condition: libc::pthread_cond_t,
}

const HEADER_LEN: usize = std::mem::size_of::<SegmentHeader>();

/// Attached (or created) shared memory frame segment.
pub struct SharedMemory {
    name: String,
    geometry: FrameGeometry,
    map: MmapMut,
    data_len: usize,
    /// The creating handle unlinks the segment on drop.
    owner: bool,
}

impl SharedMemory {
    /// Attach to an existing segment created by an external producer.
    pub fn open(name: &str, geometry: FrameGeometry) -> Result<Self> {
        let name = normalize_segment_name(name);
        let frame_len = geometry.frame_len()?;
        let c_name = segment_c_name(&name)?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(anyhow!("shared memory '{}' not found", name));
            }
            return Err(err).with_context(|| format!("failed to open shared memory '{}'", name));
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let file = unsafe { File::from_raw_fd(fd) };

        let mapped_len = file
            .metadata()
            .with_context(|| format!("failed to stat shared memory '{}'", name))?
            .len() as usize;
        if mapped_len < HEADER_LEN {
            return Err(anyhow!(
                "shared memory '{}' is {} bytes, smaller than its {} byte header",
                name,
                mapped_len,
                HEADER_LEN
            ));
        }

        // SAFETY: the segment is shared with the producer; all access to the data
        // area goes through the process-shared mutex in the header.
        let mut map = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("failed to map shared memory '{}'", name))?;
        let header = map.as_mut_ptr() as *mut SegmentHeader;
        let data_len = unsafe { addr_of_mut!((*header).size).read() } as usize;

        if HEADER_LEN + data_len > mapped_len {
            return Err(anyhow!(
                "shared memory '{}' header claims {} data bytes but only {} are mapped",
                name,
                data_len,
                mapped_len - HEADER_LEN
            ));
        }
        if data_len < frame_len {
            return Err(anyhow!(
                "shared memory '{}' holds {} bytes but a {} frame needs {}",
                name,
                data_len,
                geometry,
                frame_len
            ));
        }
        if data_len > frame_len {
            log::warn!(
                "shared memory '{}' holds {} bytes, more than a {} frame ({} bytes)",
                name,
                data_len,
                geometry,
                frame_len
            );
        }

        Ok(Self {
            name,
            geometry,
            map,
            data_len,
            owner: false,
        })
    }

    /// Create a new segment sized for one `geometry` frame (producer side).
    ///
    /// Fails if a segment with the same name already exists.
    pub fn create(name: &str, geometry: FrameGeometry) -> Result<Self> {
        let name = normalize_segment_name(name);
        let data_len = geometry.frame_len()?;
        let size = u32::try_from(data_len)
            .map_err(|_| anyhow!("a {} frame does not fit a segment header", geometry))?;
        let c_name = segment_c_name(&name)?;

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("failed to create shared memory '{}'", name));
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let file = unsafe { File::from_raw_fd(fd) };

        let setup = || -> Result<MmapMut> {
            file.set_len((HEADER_LEN + data_len) as u64)?;
            // SAFETY: freshly created segment; nobody else knows its layout yet.
            let mut map = unsafe { MmapMut::map_mut(&file)? };
            let header = map.as_mut_ptr() as *mut SegmentHeader;
            unsafe { init_header(header, size)? };
            Ok(map)
        };
        let map = match setup() {
            Ok(map) => map,
            Err(err) => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(err.context(format!("failed to initialise shared memory '{}'", name)));
            }
        };

        Ok(Self {
            name,
            geometry,
            map,
            data_len,
            owner: true,
        })
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Size of the data area in bytes.
    pub fn size(&self) -> usize {
        self.data_len
    }

    /// Copy a frame into the segment under the lock (producer side).
    pub fn write_frame(&mut self, pixels: &[u8]) -> Result<()> {
        if pixels.len() > self.data_len {
            return Err(anyhow!(
                "frame of {} bytes does not fit shared memory '{}' ({} bytes)",
                pixels.len(),
                self.name,
                self.data_len
            ));
        }
        let base = self.map.as_mut_ptr();
        let header = base as *mut SegmentHeader;
        unsafe {
            let _lock = SegmentLock::acquire(addr_of_mut!((*header).mutex))
                .with_context(|| format!("failed to lock shared memory '{}'", self.name))?;
            std::ptr::copy_nonoverlapping(pixels.as_ptr(), base.add(HEADER_LEN), pixels.len());
        }
        Ok(())
    }

    /// Wake every consumer blocked in `wait_for_next` (producer side).
    pub fn notify_all(&mut self) -> Result<()> {
        let header = self.map.as_mut_ptr() as *mut SegmentHeader;
        unsafe {
            let _lock = SegmentLock::acquire(addr_of_mut!((*header).mutex))
                .with_context(|| format!("failed to lock shared memory '{}'", self.name))?;
            check(libc::pthread_cond_broadcast(addr_of_mut!((*header).condition)))
                .with_context(|| format!("failed to signal shared memory '{}'", self.name))?;
        }
        Ok(())
    }
}

impl FrameSource for SharedMemory {
    fn name(&self) -> &str {
        &self.name
    }

    fn wait_for_next(&mut self) -> Result<()> {
        let header = self.map.as_mut_ptr() as *mut SegmentHeader;
        unsafe {
            let lock = SegmentLock::acquire(addr_of_mut!((*header).mutex))
                .with_context(|| format!("failed to lock shared memory '{}'", self.name))?;
            // pthread_cond_wait releases the mutex while blocked.
            let rc = libc::pthread_cond_wait(addr_of_mut!((*header).condition), lock.mutex);
            drop(lock);
            check(rc).with_context(|| format!("failed to wait on shared memory '{}'", self.name))
        }
    }

    fn with_lock<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(FrameView<'_>) -> R,
    {
        let base = self.map.as_mut_ptr();
        let header = base as *mut SegmentHeader;
        let _lock = unsafe { SegmentLock::acquire(addr_of_mut!((*header).mutex)) }
            .with_context(|| format!("failed to lock shared memory '{}'", self.name))?;
        // SAFETY: the producer only writes the data area while holding the mutex,
        // which we hold until `_lock` drops after `f` returns or unwinds.
        let data = unsafe { std::slice::from_raw_parts(base.add(HEADER_LEN), self.data_len) };
        let view = FrameView::new(data, self.geometry)?;
        Ok(f(view))
    }

    fn is_valid(&self) -> bool {
        self.map.len() >= HEADER_LEN + self.data_len
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        if let Ok(c_name) = segment_c_name(&self.name) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

// ----------------------------------------------------------------------------
// pthread helpers
// ----------------------------------------------------------------------------

/// Holds the segment mutex; unlocks on drop.
struct SegmentLock {
    mutex: *mut libc::pthread_mutex_t,
}

impl SegmentLock {
    /// # Safety
    /// `mutex` must point to an initialised mutex that outlives the guard.
    unsafe fn acquire(mutex: *mut libc::pthread_mutex_t) -> io::Result<Self> {
        check(libc::pthread_mutex_lock(mutex))?;
        Ok(Self { mutex })
    }
}

impl Drop for SegmentLock {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex);
        }
    }
}

/// # Safety
/// `header` must point to writable memory of at least `HEADER_LEN` bytes that
/// no other process is using yet.
unsafe fn init_header(header: *mut SegmentHeader, size: u32) -> io::Result<()> {
    addr_of_mut!((*header).size).write(size);

    let mut mutex_attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    check(libc::pthread_mutexattr_init(mutex_attr.as_mut_ptr()))?;
    let rc = libc::pthread_mutexattr_setpshared(
        mutex_attr.as_mut_ptr(),
        libc::PTHREAD_PROCESS_SHARED,
    );
    let rc = if rc == 0 {
        libc::pthread_mutex_init(addr_of_mut!((*header).mutex), mutex_attr.as_ptr())
    } else {
        rc
    };
    libc::pthread_mutexattr_destroy(mutex_attr.as_mut_ptr());
    check(rc)?;

    let mut cond_attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
    check(libc::pthread_condattr_init(cond_attr.as_mut_ptr()))?;
    let rc =
        libc::pthread_condattr_setpshared(cond_attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
    let rc = if rc == 0 {
        libc::pthread_cond_init(addr_of_mut!((*header).condition), cond_attr.as_ptr())
    } else {
        rc
    };
    libc::pthread_condattr_destroy(cond_attr.as_mut_ptr());
    check(rc)
}

/// pthread functions return the error code instead of setting errno.
fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

fn segment_c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| anyhow!("shared memory name contains NUL: {:?}", name))
}
