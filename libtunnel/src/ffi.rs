//! Functions exported to the host.
//!
//! Strings are copied in on entry; the host keeps ownership of everything
//! it passes. The only value handed out is the version string, which the
//! host releases with [`tunnel_free_string`].
//!
//! Calls block the calling thread until the operation finishes. They must
//! not be made from a thread owned by the tunnel runtime.

use libc::{AF_INET, AF_INET6, c_char, c_int};
use session_core::{
    AddressFamily, LogDestination, Logger, SessionError, SessionHandle, SessionRequest,
    SessionResult, Severity,
};
use std::ffi::{CStr, CString};
use std::ptr;

use crate::context;

/// Bring a tunnel up.
///
/// Returns a non-negative handle on success or a negative error code. Log
/// lines for this tunnel go to `log_fd` (stdout when negative) at
/// `log_level` (0 silent, 1 error, 2 info, 3 debug).
///
/// # Safety
///
/// - `name` and `settings` must each be null or a valid null-terminated C
///   string that stays alive for the duration of the call
/// - `log_fd`, when non-negative, must be an open descriptor; it is
///   duplicated, never closed
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tunnel_turn_on(
    name: *const c_char,
    mtu: c_int,
    settings: *const c_char,
    log_fd: c_int,
    log_level: c_int,
) -> i32 {
    let logger = Logger::build(
        LogDestination::from_raw_fd(log_fd),
        Severity::from_level(log_level),
    );

    // SAFETY: forwarded from this function's contract
    let request = match unsafe { read_request(name, mtu, settings) } {
        Ok(request) => request,
        Err(e) => {
            logger.error(&e.to_string());
            return e.code();
        }
    };

    let context = match context::context() {
        Ok(context) => context,
        Err(e) => {
            logger.error(&e.to_string());
            return e.code();
        }
    };

    match context
        .runtime
        .block_on(context.controller.bring_up(request, logger))
    {
        Ok(handle) => handle.as_raw(),
        Err(e) => e.code(),
    }
}

/// Bring a tunnel down. Unknown handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn tunnel_turn_off(handle: i32) {
    let (Some(context), Some(handle)) = (context::running(), SessionHandle::from_raw(handle))
    else {
        return;
    };
    context.runtime.block_on(context.controller.teardown(handle));
}

/// Bind every tunnel's `family` socket to physical interface
/// `interface_index`; `0` drops outbound traffic for that family.
///
/// `family` is `AF_INET` or `AF_INET6`; anything else is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn tunnel_rebind_socket(family: u16, interface_index: u32) {
    let Some(family) = address_family(family) else {
        return;
    };
    if let Some(context) = context::running() {
        context.controller.rebind(family, interface_index);
    }
}

/// Version of the protocol engine.
///
/// The returned string is owned by the caller and must be released with
/// [`tunnel_free_string`]. Returns null if the version cannot be
/// represented as a C string.
#[unsafe(no_mangle)]
pub extern "C" fn tunnel_version() -> *mut c_char {
    match CString::new(context::engine_version()) {
        Ok(version) => version.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Release a string returned by this library.
///
/// # Safety
///
/// - `s` must be null or a pointer returned by [`tunnel_version`] that has
///   not been freed yet
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tunnel_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: `s` came from CString::into_raw per this function's contract
    drop(unsafe { CString::from_raw(s) });
}

fn address_family(family: u16) -> Option<AddressFamily> {
    match c_int::from(family) {
        AF_INET => Some(AddressFamily::Ipv4),
        AF_INET6 => Some(AddressFamily::Ipv6),
        _ => None,
    }
}

/// # Safety
///
/// Same contract as [`tunnel_turn_on`].
unsafe fn read_request(
    name: *const c_char,
    mtu: c_int,
    settings: *const c_char,
) -> SessionResult<SessionRequest> {
    // SAFETY: forwarded from the caller
    let name = unsafe { copy_in(name, "interface name") }?;
    let settings = unsafe { copy_in(settings, "settings") }?;
    let mtu = u32::try_from(mtu)
        .map_err(|_| SessionError::InvalidArgument(format!("MTU {mtu} out of range")))?;
    Ok(SessionRequest::new(name, mtu, settings))
}

/// # Safety
///
/// `ptr` must be null or a valid null-terminated C string.
unsafe fn copy_in(ptr: *const c_char, what: &str) -> SessionResult<String> {
    if ptr.is_null() {
        return Err(SessionError::InvalidArgument(format!("{what} is null")));
    }
    // SAFETY: non-null and null-terminated per the caller's contract
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_str()
        .map(str::to_owned)
        .map_err(|_| SessionError::InvalidArgument(format!("{what} is not valid UTF-8")))
}
