use std::ffi::{c_void, CString};
use std::os::fd::{AsFd, AsRawFd};
use std::os::raw::c_char;
use std::sync::LazyLock;

use chanprims_handle::{ChannelConfig, HandleId, HandleTable};
use tracing::debug;

use crate::args;
use crate::error;
use crate::parcel::with_parcel_mut;
use crate::types::{
    ChanChannelInfo, ChanDisposeCallback, ChanFinalizer, ChanParcelHandle, ChanResult, ChanToken,
};

static TABLE: LazyLock<HandleTable> = LazyLock::new(HandleTable::new);

pub(crate) fn table() -> &'static HandleTable {
    &TABLE
}

/// Caller-owned context pointer handed back to the dispose callback.
struct CallbackData(*mut c_void);

// SAFETY: the pointer is never dereferenced here; it is only passed back to the
// caller's callback, and the caller owns its thread-safety contract.
unsafe impl Send for CallbackData {}

impl CallbackData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

/// Open a connected channel pair under `name`.
///
/// On success writes the two references to `out_pair[0]` and `out_pair[1]`.
///
/// # Safety
/// `name` must be a non-null, NUL-terminated UTF-8 C string. `out_pair` must be
/// a writable array of two `uint64_t`.
#[no_mangle]
pub unsafe extern "C" fn chan_open_pair(name: *const c_char, out_pair: *mut u64) -> ChanResult {
    crate::ffi_boundary(ChanResult::Internal, || {
        error::clear_error_state();

        let name = {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { args::required_str_arg(name, "name") } {
                Some(v) => v,
                None => return ChanResult::InvalidArgument,
            }
        };
        if out_pair.is_null() {
            return error::set_invalid_argument("out_pair cannot be null");
        }

        match table().open_pair(name, &ChannelConfig::default()) {
            Ok((server, client)) => {
                // SAFETY: `out_pair` is non-null and the caller guarantees two writable slots.
                unsafe {
                    *out_pair = server.as_raw();
                    *out_pair.add(1) = client.as_raw();
                }
                ChanResult::Ok
            }
            Err(err) => error::map_handle_error(&err),
        }
    })
}

/// Dispose (if still active) and free a reference. Used as the finalizer.
#[no_mangle]
pub extern "C" fn chan_finalize(reference: u64) {
    crate::ffi_boundary((), || {
        table().finalize(HandleId::from_raw(reference));
    });
}

/// The finalizer entry point for the owning runtime.
#[no_mangle]
pub extern "C" fn chan_get_finalizer() -> ChanFinalizer {
    chan_finalize
}

/// Dispose a reference: run its callback (once) and close its channel.
///
/// Idempotent; `0`, unknown and already disposed references are no-ops. The
/// reference stays valid for state queries until finalized.
#[no_mangle]
pub extern "C" fn chan_dispose(reference: u64) {
    crate::ffi_boundary((), || {
        table().dispose(HandleId::from_raw(reference));
    });
}

/// Read a channel from `parcel`. Returns `0` if the parcel held "no channel"
/// or decoding failed (check `chan_last_error`).
///
/// # Safety
/// `parcel` must be a valid handle returned by `chan_parcel_new`.
#[no_mangle]
pub unsafe extern "C" fn chan_read_from_parcel(parcel: ChanParcelHandle) -> u64 {
    crate::ffi_boundary(0, || {
        error::clear_error_state();

        with_parcel_mut(parcel, 0, |parcel| {
            match table().read_from_parcel(parcel) {
                Ok(id) => id.as_raw(),
                Err(err) => {
                    let _ = error::map_handle_error(&err);
                    0
                }
            }
        })
    })
}

/// Write `reference` (or "no channel" when it is `0`) to `parcel`.
///
/// # Safety
/// `parcel` must be a valid handle returned by `chan_parcel_new`.
#[no_mangle]
pub unsafe extern "C" fn chan_write_to_parcel(parcel: ChanParcelHandle, reference: u64) -> ChanResult {
    crate::ffi_boundary(ChanResult::Internal, || {
        error::clear_error_state();

        with_parcel_mut(parcel, ChanResult::InvalidArgument, |parcel| {
            match table().write_to_parcel(parcel, HandleId::from_raw(reference)) {
                Ok(()) => ChanResult::Ok,
                Err(err) => error::map_handle_error(&err),
            }
        })
    })
}

/// The channel name as a newly allocated C string, or null for reference `0`
/// or an inactive reference. Free with `chan_string_free`.
#[no_mangle]
pub extern "C" fn chan_get_name(reference: u64) -> *mut c_char {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();

        match table().name(HandleId::from_raw(reference)) {
            Ok(Some(name)) => CString::new(name.replace('\0', "?"))
                .map(CString::into_raw)
                .unwrap_or(std::ptr::null_mut()),
            Ok(None) => std::ptr::null_mut(),
            Err(err) => {
                let _ = error::map_handle_error(&err);
                std::ptr::null_mut()
            }
        }
    })
}

/// Free a string returned by `chan_get_name`.
///
/// # Safety
/// `value` must be null or a pointer returned by `chan_get_name`, freed once.
#[no_mangle]
pub unsafe extern "C" fn chan_string_free(value: *mut c_char) {
    crate::ffi_boundary((), || {
        if value.is_null() {
            return;
        }
        // SAFETY: Caller guarantees the pointer came from CString::into_raw in chan_get_name.
        unsafe {
            drop(CString::from_raw(value));
        }
    });
}

/// Duplicate a reference onto an independent descriptor. Returns `0` on
/// failure (check `chan_last_error`).
#[no_mangle]
pub extern "C" fn chan_dup(reference: u64) -> u64 {
    crate::ffi_boundary(0, || {
        error::clear_error_state();

        match table().duplicate(HandleId::from_raw(reference)) {
            Ok(id) => id.as_raw(),
            Err(err) => {
                let _ = error::map_handle_error(&err);
                0
            }
        }
    })
}

/// Write the connection token of `reference` to `out_token`.
///
/// Reference `0` yields the all-zero token and `CHAN_OK`.
///
/// # Safety
/// `out_token` must be a non-null writable pointer.
#[no_mangle]
pub unsafe extern "C" fn chan_get_token(reference: u64, out_token: *mut ChanToken) -> ChanResult {
    crate::ffi_boundary(ChanResult::Internal, || {
        error::clear_error_state();

        if out_token.is_null() {
            return error::set_invalid_argument("out_token cannot be null");
        }

        match table().connection_token(HandleId::from_raw(reference)) {
            Ok(token) => {
                // SAFETY: Pointer was checked for null above.
                unsafe {
                    *out_token = token.map(ChanToken::from).unwrap_or_default();
                }
                ChanResult::Ok
            }
            Err(err) => error::map_handle_error(&err),
        }
    })
}

/// Register the dispose callback for `reference`, replacing any earlier one.
///
/// The callback runs once, at first disposal (explicit or via the finalizer),
/// with the channel still open. It receives a [`ChanChannelInfo`] describing
/// that channel, since the reference itself already reads as disposed by then.
/// Registering on `0` or an inactive reference is a logged no-op.
///
/// # Safety
/// `callback` must be safe to call from whichever thread disposes the reference,
/// with `data` as its third argument. It must not close `fd` or keep `name`
/// past its return.
#[no_mangle]
pub unsafe extern "C" fn chan_register_dispose_callback(
    reference: u64,
    callback: Option<ChanDisposeCallback>,
    data: *mut c_void,
) -> ChanResult {
    crate::ffi_boundary(ChanResult::Internal, || {
        error::clear_error_state();

        let Some(callback) = callback else {
            return error::set_invalid_argument("callback cannot be null");
        };
        let data = CallbackData(data);

        let registered = table().register_disposal_hook(
            HandleId::from_raw(reference),
            Box::new(move |channel| {
                let name = CString::new(channel.name().replace('\0', "?")).unwrap_or_default();
                let info = ChanChannelInfo {
                    fd: channel.as_fd().as_raw_fd(),
                    token: channel.token().into(),
                    name: name.as_ptr(),
                };
                // SAFETY: The registrant guarantees `callback` accepts `data` on this thread;
                // `info` and `name` outlive the call.
                unsafe { callback(reference, &info, data.get()) }
            }),
        );
        if registered {
            debug!(reference, "registered dispose callback");
        }
        ChanResult::Ok
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;
    use std::io::{Read, Write};
    use std::os::fd::BorrowedFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    fn open(name: &str) -> (u64, u64) {
        let name = CString::new(name).unwrap();
        let mut pair = [0u64; 2];
        // SAFETY: `name` is a valid C string and `pair` has two writable slots.
        let result = unsafe { chan_open_pair(name.as_ptr(), pair.as_mut_ptr()) };
        assert_eq!(result, ChanResult::Ok);
        (pair[0], pair[1])
    }

    fn name_of(reference: u64) -> Option<String> {
        let ptr = chan_get_name(reference);
        if ptr.is_null() {
            return None;
        }
        // SAFETY: `ptr` was returned by chan_get_name.
        let name = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        // SAFETY: freed once, as returned.
        unsafe { chan_string_free(ptr) };
        Some(name)
    }

    fn token_of(reference: u64) -> ChanToken {
        let mut token = ChanToken::default();
        // SAFETY: `token` is a valid writable location.
        assert_eq!(unsafe { chan_get_token(reference, &mut token) }, ChanResult::Ok);
        token
    }

    unsafe extern "C" fn count_dispose(
        _reference: u64,
        _channel: *const ChanChannelInfo,
        data: *mut c_void,
    ) {
        // SAFETY: tests pass a pointer to a live AtomicUsize.
        let counter = unsafe { &*(data as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn open_pair_reports_shared_name_and_token() {
        let (a, b) = open("ffi pair");
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_eq!(name_of(a).as_deref(), Some("ffi pair"));
        assert_eq!(name_of(b).as_deref(), Some("ffi pair"));
        assert_eq!(token_of(a), token_of(b));
        assert_ne!(token_of(a), ChanToken::default());

        chan_finalize(a);
        chan_finalize(b);
    }

    #[test]
    fn null_name_is_invalid_argument() {
        let mut pair = [0u64; 2];
        // SAFETY: null is explicitly handled.
        let result = unsafe { chan_open_pair(std::ptr::null(), pair.as_mut_ptr()) };
        assert_eq!(result, ChanResult::InvalidArgument);
        assert_eq!(pair, [0, 0]);
    }

    #[test]
    fn absent_reference_reads_are_empty() {
        assert!(name_of(0).is_none());
        assert_eq!(token_of(0), ChanToken::default());
        chan_dispose(0);
        chan_finalize(0);
    }

    #[test]
    fn dup_of_absent_sets_error() {
        assert_eq!(chan_dup(0), 0);
        // SAFETY: chan_last_error returns a pointer to a thread-local CString.
        let text = unsafe { CStr::from_ptr(crate::chan_last_error()) }
            .to_str()
            .unwrap();
        assert!(text.contains("duplicate"));
    }

    #[test]
    fn dup_survives_disposal_of_original() {
        let (a, b) = open("dup");
        let copy = chan_dup(a);
        assert_ne!(copy, 0);
        assert_eq!(token_of(copy), token_of(a));

        chan_dispose(a);
        assert!(name_of(a).is_none());
        assert_eq!(name_of(copy).as_deref(), Some("dup"));

        for reference in [a, b, copy] {
            chan_finalize(reference);
        }
    }

    #[test]
    fn dispose_callback_fires_once_across_dispose_and_finalize() {
        let (a, b) = open("callback");
        let counter = AtomicUsize::new(0);
        let data = &counter as *const AtomicUsize as *mut c_void;

        // SAFETY: `count_dispose` accepts `data`, which outlives the reference.
        let result = unsafe { chan_register_dispose_callback(a, Some(count_dispose), data) };
        assert_eq!(result, ChanResult::Ok);

        chan_dispose(a);
        chan_dispose(a);
        let finalizer = chan_get_finalizer();
        finalizer(a);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        finalizer(b);
    }

    #[test]
    fn finalizer_alone_fires_callback() {
        let (a, b) = open("gc only");
        let counter = AtomicUsize::new(0);
        let data = &counter as *const AtomicUsize as *mut c_void;
        // SAFETY: `count_dispose` accepts `data`, which outlives the reference.
        unsafe { chan_register_dispose_callback(a, Some(count_dispose), data) };

        chan_get_finalizer()(a);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        chan_finalize(b);
    }

    type Farewell = Mutex<Option<(u64, String, ChanToken)>>;

    unsafe extern "C" fn say_farewell(
        reference: u64,
        channel: *const ChanChannelInfo,
        data: *mut c_void,
    ) {
        // SAFETY: the library passes a live info struct for the duration of the call.
        let info = unsafe { &*channel };
        // SAFETY: `name` is NUL-terminated and valid during the call.
        let name = unsafe { CStr::from_ptr(info.name) }.to_str().unwrap().to_string();
        // SAFETY: the descriptor stays open until this callback returns.
        let fd = unsafe { BorrowedFd::borrow_raw(info.fd) };
        let mut stream = UnixStream::from(fd.try_clone_to_owned().unwrap());
        stream.write_all(b"bye").unwrap();

        // SAFETY: tests pass a pointer to a live `Farewell`.
        let seen = unsafe { &*(data as *const Farewell) };
        *seen.lock().unwrap() = Some((reference, name, info.token));
    }

    #[test]
    fn dispose_callback_can_use_the_closing_channel() {
        let (a, b) = open("farewell");
        let expected = token_of(a);
        let seen: Farewell = Mutex::new(None);
        let data = &seen as *const Farewell as *mut c_void;

        // SAFETY: `say_farewell` accepts `data`, which outlives the reference.
        let result = unsafe { chan_register_dispose_callback(a, Some(say_farewell), data) };
        assert_eq!(result, ChanResult::Ok);
        chan_dispose(a);

        assert_eq!(
            seen.lock().unwrap().clone(),
            Some((a, "farewell".to_string(), expected))
        );

        let peer = table().get(HandleId::from_raw(b)).unwrap();
        let mut buf = [0u8; 3];
        peer.with_channel("read", |channel| {
            let mut reader = channel;
            reader.read_exact(&mut buf).unwrap();
        })
        .unwrap();
        assert_eq!(&buf, b"bye");

        chan_finalize(a);
        chan_finalize(b);
    }

    #[test]
    fn null_callback_is_invalid_argument() {
        // SAFETY: a null callback is explicitly handled.
        let result = unsafe { chan_register_dispose_callback(0, None, std::ptr::null_mut()) };
        assert_eq!(result, ChanResult::InvalidArgument);
    }

    #[test]
    fn parcel_roundtrip_preserves_identity() {
        let (a, b) = open("parceled");
        let parcel = crate::chan_parcel_new();

        // SAFETY: `parcel` is a live handle from chan_parcel_new.
        unsafe {
            assert_eq!(chan_write_to_parcel(parcel, a), ChanResult::Ok);
            assert_eq!(chan_write_to_parcel(parcel, 0), ChanResult::Ok);
            assert_eq!(crate::chan_parcel_rewind(parcel), ChanResult::Ok);

            let restored = chan_read_from_parcel(parcel);
            let absent = chan_read_from_parcel(parcel);
            assert_ne!(restored, 0);
            assert_eq!(absent, 0);
            assert_eq!(name_of(restored).as_deref(), Some("parceled"));
            assert_eq!(token_of(restored), token_of(a));

            crate::chan_parcel_free(parcel);
            for reference in [a, b, restored] {
                chan_finalize(reference);
            }
        }
    }

    #[test]
    fn writing_disposed_reference_fails() {
        let (a, b) = open("stale");
        chan_dispose(a);
        let parcel = crate::chan_parcel_new();
        // SAFETY: `parcel` is a live handle from chan_parcel_new.
        unsafe {
            assert_eq!(chan_write_to_parcel(parcel, a), ChanResult::InvalidHandle);
            crate::chan_parcel_free(parcel);
        }
        chan_finalize(a);
        chan_finalize(b);
    }
}
