//! Locating and fingerprinting downloaded app archives.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

const HASH_CHUNK: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub present: bool,
    pub path: PathBuf,
}

#[must_use]
pub fn archive_file_name(uid: u64, version: &str) -> String {
    format!("{uid}_{version}.tgz")
}

/// Versions end up inside file names, so anything that could escape the
/// output directory is refused.
#[must_use]
pub fn is_safe_version(version: &str) -> bool {
    !version.is_empty()
        && !version.contains(['/', '\\'])
        && !version.contains("..")
        && !version.chars().any(char::is_control)
}

/// Existence of `<uid>_<version>.tgz` is the only signal; contents are never inspected.
#[must_use]
pub fn probe(uid: u64, version: &str, output_dir: &Path) -> Probe {
    let path = output_dir.join(archive_file_name(uid, version));
    Probe {
        present: path.is_file(),
        path,
    }
}

/// SHA-256 of the file as lowercase hex, or `None` when it does not exist.
pub fn hash_archive(path: &Path) -> io::Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; HASH_CHUNK];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(Some(hex::encode(hasher.finalize())))
}
