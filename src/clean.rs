use std::fs;
use std::io;
use std::time::Instant;

use camino::Utf8Path;

use crate::core::as_overhead;

/// Removes everything inside the output root, leaving an empty directory.
///
/// A missing root is created, so calling this twice in a row is fine.
pub fn clean(root: &Utf8Path) -> io::Result<()> {
    let s = Instant::now();

    match fs::read_dir(root) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                let path = entry.path();

                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(path)?;
                } else {
                    fs::remove_file(path)?;
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(root)?,
        Err(e) => return Err(e),
    }

    tracing::info!("cleaned {} {}", root, as_overhead(s));

    Ok(())
}
