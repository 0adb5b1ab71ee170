//! Low-level PE file format check through the goblin library

use crate::common::LookupError;
use fs_err as fs;
use std::path::Path;

/// Whether the file parses as a PE image
pub fn is_pe_image<P: AsRef<Path>>(path: P) -> Result<bool, LookupError> {
    let content = fs::read(path.as_ref())?;
    match goblin::Object::parse(&content) {
        Ok(goblin::Object::PE(_)) => Ok(true),
        Ok(other) => {
            log::debug!("unexpected executable format: {:?}", other);
            Ok(false)
        }
        Err(e) => {
            log::debug!("{}: {}", path.as_ref().display(), e);
            Ok(false)
        }
    }
}

/// Fail unless the path points to an existing PE image
pub fn ensure_pe_image<P: AsRef<Path>>(path: P) -> Result<(), LookupError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(LookupError::PathNotFound(path.to_owned()));
    }
    if !is_pe_image(path)? {
        return Err(LookupError::NotAnImage(path.to_owned()));
    }
    Ok(())
}
