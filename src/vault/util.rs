use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

fn ensure_executable_path(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("binary path does not exist: {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("binary path is not a file: {}", path.display());
    }
    Ok(())
}

/// Resolve a collaborator binary from an explicit override, `env_var`, or `PATH`.
pub fn resolve_bin(explicit: Option<&Path>, env_var: &str, name: &str) -> Result<PathBuf> {
    if let Some(path) = explicit {
        ensure_executable_path(path)?;
        return Ok(path.to_path_buf());
    }
    if let Ok(custom) = env::var(env_var) {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            let path = PathBuf::from(trimmed);
            ensure_executable_path(&path)?;
            return Ok(path);
        }
    }
    which::which(name).with_context(|| format!("{name} binary not found in {env_var} or PATH"))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Runs `cmd` to completion, killing it after `timeout_secs`.
///
/// Both pipes are drained while waiting so a chatty child never blocks on a
/// full pipe.
pub fn run_command_with_optional_timeout(
    cmd: &mut Command,
    timeout_secs: Option<u64>,
) -> Result<Output> {
    let Some(timeout_secs) = timeout_secs else {
        return Ok(cmd.output()?);
    };
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Output {
                status,
                stdout: collect(stdout),
                stderr: collect(stderr),
            });
        }
        if started.elapsed() >= Duration::from_secs(timeout_secs) {
            let _ = child.kill();
            let _ = child.wait();
            // readers finish on their own once every holder of the pipes exits
            drop((stdout, stderr));
            anyhow::bail!("command timed out after {}s", timeout_secs);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn describe_failure(bin: &Path, args: &[String], out: &Output) -> String {
    format!(
        "`{} {}` exited with {}\nstdout: {}\nstderr: {}",
        bin.display(),
        args.join(" "),
        out.status,
        String::from_utf8_lossy(&out.stdout).trim(),
        String::from_utf8_lossy(&out.stderr).trim()
    )
}
