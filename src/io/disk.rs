use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::models::JobId;
use crate::SCRATCH_FILE_PREFIX;

/// Scratch file owned by a single disk benchmark, removed on drop
pub struct ScratchFile {
    path: PathBuf,
    file: File,
}

impl ScratchFile {
    /// Create (or truncate) the scratch file for `job_id` inside `dir`
    pub fn create(dir: &Path, job_id: &JobId) -> io::Result<Self> {
        let path = scratch_file_path(dir, job_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Open a second, read-only handle on the same file
    pub fn open_read(&self) -> io::Result<File> {
        File::open(&self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch file");
            }
        }
    }
}

/// Unique per-job scratch file location
pub fn scratch_file_path(dir: &Path, job_id: &JobId) -> PathBuf {
    dir.join(format!("{}{}.dat", SCRATCH_FILE_PREFIX, job_id))
}

/// Ask the kernel to drop cached pages of `file` so the read phase hits the device.
///
/// Best effort: the file must already be synced for the pages to be clean.
#[cfg(unix)]
pub fn drop_page_cache(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        // SAFETY: the descriptor is valid for the lifetime of `file`
        let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        let _ = file.as_raw_fd();
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn drop_page_cache(_file: &File) -> io::Result<()> {
    Ok(())
}
