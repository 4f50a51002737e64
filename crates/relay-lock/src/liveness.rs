/// Check whether `pid` still refers to a live process, without sending a
/// signal — `kill(pid, 0)` only checks for existence/permission. Any failure
/// other than `ESRCH` (no such process) is treated as "alive", matching the
/// conservative stance of refusing to start rather than risk a double-run.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn implausible_pid_is_not_alive() {
        assert!(!is_alive(u32::MAX));
    }
}
