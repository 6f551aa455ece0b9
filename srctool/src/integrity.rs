//! Content checksums of downloaded archives and installed plugins.
//!
//! Digests are MD5 over the full byte stream of a file, lower-case hex
//! encoded, which is the format of the server's `MD5SUMS` catalog.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::Result;

/// Compute the digest of a file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn checksum(path: &Path) -> Result<String> {
    let file = File::open(path).inspect_err(|e| debug!("cannot open {}: {e}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file against an expected digest.
///
/// A mismatch is `Ok(false)`; only a failure to read the file is an error,
/// so callers can tell "could not verify" from "verified and mismatched".
pub fn verify(path: &Path, expected: &str) -> Result<bool> {
    let actual = checksum(path)?;
    debug!("expected MD5 sum: {expected}");
    debug!("MD5 sum found: {actual}");
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}
