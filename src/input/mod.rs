pub mod event;
pub mod file_id;

pub use event::{FileEvent, FileInfo, FileState};
pub use file_id::FileId;

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Open a file read-only.
pub fn read_open(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

/// Whether an open handle refers to a regular file (not a directory, FIFO,
/// socket or device).
pub fn is_regular_file(file: &File) -> io::Result<bool> {
    Ok(file.metadata()?.file_type().is_file())
}
