//! Helpers for driving backends into their error paths.

use std::fs::File;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Make `fd` a known-closed descriptor number.
///
/// Pick a number well above anything the test process opens, so the
/// lowest-free allocation never hands it out again while the test runs.
pub(crate) fn closed_descriptor(fd: RawFd) -> RawFd {
    let file = File::open("/dev/null").unwrap();
    assert_eq!(unsafe { libc::dup2(file.as_raw_fd(), fd) }, fd);
    assert_eq!(unsafe { libc::close(fd) }, 0);
    fd
}

extern "C" fn wake(_signal: libc::c_int) {}

/// Signals the creating thread with SIGUSR1 until dropped, so a blocking
/// readiness call on that thread comes back with `EINTR`.
pub(crate) struct Interrupter {
    done: Arc<AtomicBool>,
    sender: Option<JoinHandle<()>>,
}

impl Interrupter {
    pub(crate) fn start() -> Self {
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = wake as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(libc::sigaction(libc::SIGUSR1, &action, ptr::null_mut()), 0);
        }

        // pthread_t is a pointer on some platforms, which is not Send.
        let target = unsafe { libc::pthread_self() } as usize;
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let sender = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(20));
                unsafe { libc::pthread_kill(target as libc::pthread_t, libc::SIGUSR1) };
            }
        });

        Self {
            done,
            sender: Some(sender),
        }
    }
}

impl Drop for Interrupter {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(sender) = self.sender.take() {
            let _ = sender.join();
        }
    }
}
