use tracing::warn;

/// Spawn a detached shell that sleeps `delay_sec` (already clamped to
/// 1-600) and then runs `restart_command`, and forget about it — the
/// process outlives this one, which is the point.
#[cfg(unix)]
pub fn schedule_restart(delay_sec: i64, restart_command: &str) {
    let script = format!("sleep {delay_sec} && {restart_command}");
    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c").arg(&script);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());
    match cmd.spawn() {
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to spawn external restart process"),
    }
}

#[cfg(not(unix))]
pub fn schedule_restart(delay_sec: i64, restart_command: &str) {
    let script = format!("timeout /t {delay_sec} /nobreak >NUL & {restart_command}");
    let mut cmd = std::process::Command::new("cmd");
    cmd.arg("/C").arg(&script);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());
    match cmd.spawn() {
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to spawn external restart process"),
    }
}
