//! Detaching from the controlling terminal

use crate::Result;
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{dup2, fork, setsid, ForkResult};
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Double-fork into the background, start a new session, move to `/` and
/// point stdio at `/dev/null`.
///
/// Must run before the Tokio runtime exists: `fork` only clones the calling
/// thread, so any worker threads would be lost in the child. The calling
/// process and the intermediate child exit with status 0.
#[allow(unsafe_code)]
pub fn daemonize() -> Result<()> {
    // SAFETY: called from `main` before any runtime or other thread starts
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid()?;

    // SAFETY: still single-threaded, we are the first child
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    std::env::set_current_dir("/")?;
    redirect_stdio()?;
    Ok(())
}

fn redirect_stdio() -> Result<()> {
    let dev_null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    let fd = dev_null.as_raw_fd();

    for target in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
        dup2(fd, target)?;
    }
    Ok(())
}

/// Resolve `path` against the current directory so it survives the `chdir("/")`
/// done by [`daemonize`]
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize() {
        let absolute = Path::new("/var/tmp/aesdsocketdata");
        assert_eq!(absolutize(absolute).unwrap(), absolute);

        let relative = absolutize(Path::new("data/log")).unwrap();
        assert!(relative.is_absolute());
        assert!(relative.ends_with("data/log"));
        assert_eq!(relative, std::env::current_dir().unwrap().join("data/log"));
    }
}
