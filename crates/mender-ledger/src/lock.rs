use crate::paths::MenderPaths;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

/// Exclusive workspace lock backed by `.mender/LOCK`.
///
/// The holder writes its pid and what it is doing into the file, so a
/// refused command can say who is in the way. Released when dropped.
pub struct WorkspaceLock {
    file: File,
}

impl WorkspaceLock {
    /// Try to acquire the workspace lock (non-blocking) for `purpose`,
    /// e.g. `"execute INC-2991"`.
    pub fn acquire(paths: &MenderPaths, purpose: &str) -> anyhow::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&paths.lock_file)
            .map_err(|e| {
                anyhow::anyhow!("cannot open lock file {}: {}", paths.lock_file.display(), e)
            })?;

        if file.try_lock_exclusive().is_err() {
            let holder = read_holder(&mut file).unwrap_or_else(|| "holder unknown".to_string());
            anyhow::bail!(
                "workspace is locked by another mender process ({holder}); lock file {}",
                paths.lock_file.display()
            );
        }

        file.set_len(0)?;
        writeln!(file, "pid {}: {purpose}", std::process::id())?;
        file.flush()?;
        tracing::debug!(%purpose, "workspace locked");
        Ok(Self { file })
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
    }
}

fn read_holder(file: &mut File) -> Option<String> {
    let mut text = String::new();
    file.read_to_string(&mut text).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
