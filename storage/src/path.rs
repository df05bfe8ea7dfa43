//! Path handling.
//!
//! Every path handed to a [`crate::FileSystem`] goes through [`resolve`]
//! first, so file systems only ever see absolute, normalised paths.

use alloc::string::String;
use alloc::vec::Vec;

use crate::vfs::{MAX_NAME_LEN, MAX_PATH_LEN};
use crate::StorageError;

/// Whether `path` names a device (`con:`, `lhd0:`) rather than a file.
pub fn is_device(path: &str) -> bool {
    match path.find(':') {
        Some(colon) => !path[..colon].contains('/') && colon > 0,
        None => false,
    }
}

/// Resolve `path` against the working directory `cwd`.
///
/// `.` and empty components are dropped, `..` climbs one level and
/// stops at the root. Device names are returned unchanged.
pub fn resolve(cwd: &str, path: &str) -> Result<String, StorageError> {
    if path.is_empty() {
        return Err(StorageError::InvalidPath);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(StorageError::NameTooLong);
    }
    if is_device(path) {
        return Ok(String::from(path));
    }

    let mut parts: Vec<&str> = Vec::new();
    let joined = if path.starts_with('/') {
        None
    } else {
        Some(cwd)
    };

    for component in joined
        .into_iter()
        .flat_map(|c| c.split('/'))
        .chain(path.split('/'))
    {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => {
                if name.len() > MAX_NAME_LEN {
                    return Err(StorageError::NameTooLong);
                }
                parts.push(name);
            }
        }
    }

    let mut out = String::with_capacity(path.len() + cwd.len() + 1);
    for part in &parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    if out.len() > MAX_PATH_LEN {
        return Err(StorageError::NameTooLong);
    }
    Ok(out)
}

/// Split a normalised absolute path into (parent, final component).
///
/// The root has no final component and yields `("/", "")`.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}
