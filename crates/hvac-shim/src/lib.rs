//! LD_PRELOAD entry point. Exposes the extern "C" contract functions spec'd
//! surface names (`hvac_track_file`, `hvac_get_path`, `hvac_remove_fd`,
//! `hvac_remote_read`, `hvac_remote_pread`, `hvac_remote_close`,
//! `hvac_file_tracked`, `hvac_remote_lseek`) plus thin `open`/`close`/
//! `read`/`pread`/`lseek` hooks that call into them. No redirection logic
//! lives here; it all lives in `hvac-core::HvacClient`.

mod reals;

use std::cell::{Cell, RefCell};
use std::ffi::{c_void, CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::OnceLock;

use hvac_config::path::OpenFlags;
use hvac_config::Config;
use hvac_core::HvacClient;
use libc::{c_char, c_int, mode_t, off_t, size_t, ssize_t};

use reals::{CloseFn, LseekFn, OpenFn, PreadFn, ReadFn, REAL_CLOSE, REAL_LSEEK, REAL_OPEN, REAL_PREAD, REAL_READ};

static CLIENT: OnceLock<Option<HvacClient>> = OnceLock::new();

thread_local! {
    static IN_SHIM: Cell<bool> = const { Cell::new(false) };
    static PATH_SCRATCH: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Guards against re-entering the shim from within its own code path (e.g.
/// `Path::canonicalize` calling back into our interposed `open`).
struct ShimGuard;

impl ShimGuard {
    fn enter() -> Option<Self> {
        if IN_SHIM.with(|b| b.get()) {
            None
        } else {
            IN_SHIM.with(|b| b.set(true));
            Some(ShimGuard)
        }
    }
}

impl Drop for ShimGuard {
    fn drop(&mut self) {
        IN_SHIM.with(|b| b.set(false));
    }
}

#[ctor::ctor]
fn hvac_shim_init() {
    hvac_config::logging::init();
    let client = Config::from_env().ok().map(HvacClient::new);
    if client.is_none() {
        tracing::debug!("hvac-shim: HVAC_SERVER_COUNT unset, shim inert");
    }
    let _ = CLIENT.set(client);
}

fn client() -> Option<&'static HvacClient> {
    CLIENT.get().and_then(|c| c.as_ref())
}

// ---------------------------------------------------------------------------
// Contract surface
// ---------------------------------------------------------------------------

/// # Safety
/// `path` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn hvac_track_file(path: *const c_char, flags: c_int, fd: c_int) -> c_int {
    let Some(client) = client() else { return 0 };
    let Ok(path_str) = CStr::from_ptr(path).to_str() else {
        return 0;
    };
    let open_flags = OpenFlags {
        write_only: flags & libc::O_ACCMODE == libc::O_WRONLY,
        append: flags & libc::O_APPEND != 0,
    };
    client.track_file(Path::new(path_str), &open_flags, fd) as c_int
}

#[no_mangle]
pub extern "C" fn hvac_file_tracked(fd: c_int) -> c_int {
    client().map(|c| c.file_tracked(fd)).unwrap_or(false) as c_int
}

/// Returns a pointer valid until the next call on the current thread, or
/// NULL if `fd` is untracked. Mirrors `hvac_get_path`'s "string or empty"
/// contract with a thread-local scratch buffer instead of a heap leak.
#[no_mangle]
pub extern "C" fn hvac_get_path(fd: c_int) -> *const c_char {
    let Some(client) = client() else { return ptr::null() };
    let Some(path) = client.get_path(fd) else {
        return ptr::null();
    };
    let Ok(cstring) = CString::new(path) else {
        return ptr::null();
    };
    let ptr = cstring.as_ptr();
    PATH_SCRATCH.with(|slot| *slot.borrow_mut() = Some(cstring));
    ptr
}

#[no_mangle]
pub extern "C" fn hvac_remove_fd(fd: c_int) -> c_int {
    client().map(|c| c.remove_fd(fd)).unwrap_or(false) as c_int
}

/// # Safety
/// `buf` must be valid for `count` bytes.
#[no_mangle]
pub unsafe extern "C" fn hvac_remote_read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    let Some(client) = client() else { return -1 };
    let slice = std::slice::from_raw_parts_mut(buf as *mut u8, count);
    client.remote_read(fd, slice) as ssize_t
}

/// # Safety
/// `buf` must be valid for `count` bytes.
#[no_mangle]
pub unsafe extern "C" fn hvac_remote_pread(
    fd: c_int,
    buf: *mut c_void,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    let Some(client) = client() else { return -1 };
    let slice = std::slice::from_raw_parts_mut(buf as *mut u8, count);
    client.remote_pread(fd, slice, offset as i64) as ssize_t
}

#[no_mangle]
pub extern "C" fn hvac_remote_close(fd: c_int) {
    if let Some(client) = client() {
        client.remote_close(fd);
    }
}

#[no_mangle]
pub extern "C" fn hvac_remote_lseek(fd: c_int, offset: off_t, whence: c_int) -> off_t {
    let Some(client) = client() else { return -1 };
    client.remote_lseek(fd, offset as i32, whence) as off_t
}

// ---------------------------------------------------------------------------
// libc interposition
// ---------------------------------------------------------------------------

/// Fixed `mode_t` rather than a true C variadic (stable Rust can't define
/// variadic `extern "C" fn`s); callers that omit the mode argument pass
/// whatever garbage is on the stack/in registers there, same as the real
/// `open` does when `O_CREAT` isn't set and it goes unread.
#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let real_open: OpenFn = REAL_OPEN.get();
    let guard = match ShimGuard::enter() {
        Some(g) => g,
        None => return real_open(path, flags, mode),
    };
    let fd = real_open(path, flags, mode);
    if fd >= 0 {
        hvac_track_file(path, flags, fd);
    }
    drop(guard);
    fd
}

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    let real_close: CloseFn = REAL_CLOSE.get();
    let guard = match ShimGuard::enter() {
        Some(g) => g,
        None => return real_close(fd),
    };
    hvac_remove_fd(fd);
    let ret = real_close(fd);
    drop(guard);
    ret
}

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    let real_read: ReadFn = REAL_READ.get();
    let guard = match ShimGuard::enter() {
        Some(g) => g,
        None => return real_read(fd, buf, count),
    };
    let ret = hvac_remote_read(fd, buf, count);
    drop(guard);
    if ret >= 0 {
        ret
    } else {
        real_read(fd, buf, count)
    }
}

#[no_mangle]
pub unsafe extern "C" fn pread(fd: c_int, buf: *mut c_void, count: size_t, offset: off_t) -> ssize_t {
    let real_pread: PreadFn = REAL_PREAD.get();
    let guard = match ShimGuard::enter() {
        Some(g) => g,
        None => return real_pread(fd, buf, count, offset),
    };
    let ret = hvac_remote_pread(fd, buf, count, offset);
    drop(guard);
    if ret >= 0 {
        ret
    } else {
        real_pread(fd, buf, count, offset)
    }
}

#[no_mangle]
pub unsafe extern "C" fn lseek(fd: c_int, offset: off_t, whence: c_int) -> off_t {
    let real_lseek: LseekFn = REAL_LSEEK.get();
    let guard = match ShimGuard::enter() {
        Some(g) => g,
        None => return real_lseek(fd, offset, whence),
    };
    let ret = if hvac_file_tracked(fd) != 0 {
        hvac_remote_lseek(fd, offset, whence)
    } else {
        -1
    };
    drop(guard);
    if ret >= 0 {
        ret
    } else {
        real_lseek(fd, offset, whence)
    }
}
