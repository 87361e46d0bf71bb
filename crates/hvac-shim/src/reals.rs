//! Lazily-resolved pointers to the real libc symbols, looked up via
//! `dlsym(RTLD_NEXT, ...)` the first time each is called, so hooks never
//! recurse into themselves when LD_PRELOAD shadows these names.

use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicPtr, Ordering};

pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    name: &'static str,
}

impl RealSymbol {
    const fn new(name: &'static str) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    fn resolve(&self) -> *mut c_void {
        let cached = self.ptr.load(Ordering::Acquire);
        if !cached.is_null() {
            return cached;
        }
        let cname = CString::new(self.name).expect("symbol name has no interior NUL");
        let resolved = unsafe { libc::dlsym(libc::RTLD_NEXT, cname.as_ptr()) };
        if resolved.is_null() {
            panic!("hvac-shim: dlsym(RTLD_NEXT, {}) returned NULL", self.name);
        }
        self.ptr.store(resolved, Ordering::Release);
        resolved
    }

    pub fn get<F>(&self) -> F
    where
        F: Copy,
    {
        let ptr = self.resolve();
        unsafe { std::mem::transmute_copy::<*mut c_void, F>(&ptr) }
    }
}

pub type OpenFn =
    unsafe extern "C" fn(*const libc::c_char, libc::c_int, libc::mode_t) -> libc::c_int;
pub type CloseFn = unsafe extern "C" fn(libc::c_int) -> libc::c_int;
pub type ReadFn = unsafe extern "C" fn(libc::c_int, *mut c_void, libc::size_t) -> libc::ssize_t;
pub type PreadFn =
    unsafe extern "C" fn(libc::c_int, *mut c_void, libc::size_t, libc::off_t) -> libc::ssize_t;
pub type LseekFn = unsafe extern "C" fn(libc::c_int, libc::off_t, libc::c_int) -> libc::off_t;

pub static REAL_OPEN: RealSymbol = RealSymbol::new("open");
pub static REAL_CLOSE: RealSymbol = RealSymbol::new("close");
pub static REAL_READ: RealSymbol = RealSymbol::new("read");
pub static REAL_PREAD: RealSymbol = RealSymbol::new("pread");
pub static REAL_LSEEK: RealSymbol = RealSymbol::new("lseek");
