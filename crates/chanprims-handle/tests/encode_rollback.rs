//! Runs alone in its own binary: it lowers the process descriptor limit.
#![cfg(unix)]

use std::fs::File;
use std::os::fd::AsRawFd;

use chanprims_handle::{open_pair, write_handle, HandleError};
use chanprims_parcel::Parcel;

fn nofile_limit() -> libc::rlimit {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid writable rlimit.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    assert_eq!(rc, 0, "getrlimit failed");
    limit
}

fn set_nofile_limit(limit: &libc::rlimit) {
    // SAFETY: `limit` points at a valid rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, limit) };
    assert_eq!(rc, 0, "setrlimit failed");
}

#[test]
fn failed_encode_leaves_parcel_untouched() {
    let (a, _b) = open_pair("rollback").unwrap();

    let mut parcel = Parcel::new();
    parcel.write_i32(42);
    let before = parcel.data().to_vec();

    let original = nofile_limit();
    let highest = File::open("/dev/null").unwrap().as_raw_fd();
    let lowered = libc::rlimit {
        rlim_cur: (highest as libc::rlim_t) + 8,
        rlim_max: original.rlim_max,
    };
    set_nofile_limit(&lowered);

    // Use up every remaining descriptor so the encoder's duplicate fails.
    let mut hoard = Vec::new();
    while let Ok(file) = File::open("/dev/null") {
        hoard.push(file);
        assert!(hoard.len() < 4096, "descriptor limit not enforced");
    }

    let result = write_handle(&mut parcel, Some(&a));

    drop(hoard);
    set_nofile_limit(&original);

    assert!(matches!(result, Err(HandleError::Encode(_))), "{result:?}");
    assert_eq!(parcel.data(), before.as_slice());
    assert_eq!(parcel.fd_count(), 0);
    assert!(a.is_active());
}
