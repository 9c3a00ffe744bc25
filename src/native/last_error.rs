// errno snapshot of the last native call that asked for one, per thread

use std::cell::Cell;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// errno as captured after the most recent errno-saving call on this thread
pub fn last_error() -> i32 {
    LAST_ERROR.with(|e| e.get())
}

pub fn set_last_error(error: i32) {
    LAST_ERROR.with(|e| e.set(error));
}

pub(crate) fn capture() {
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    set_last_error(errno);
}
