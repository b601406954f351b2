use std::path::{Component, Path};

use crate::TransferError;

/// Validates that an artifact name is a single, plain path component.
///
/// Rejects:
/// - Empty names
/// - Names containing `/` or `\`
/// - Names starting with `.` (reserved for store internals, covers `.`/`..`)
/// - Anything that would not resolve to exactly one normal component
pub fn validate_artifact_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidName(format!(
            "path separator not allowed: {name}"
        )));
    }

    if name.starts_with('.') {
        return Err(TransferError::InvalidName(format!(
            "leading dot not allowed: {name}"
        )));
    }

    if name.contains('\0') {
        return Err(TransferError::InvalidName(format!(
            "NUL byte not allowed: {name:?}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}

/// Extracts the numeric index from a chunk name (`<anything>-<index>`).
pub fn chunk_index(chunk_name: &str) -> Option<u64> {
    let (_, index) = chunk_name.rsplit_once('-')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

/// Validates that `chunk_name` is `<artifact>-<index>` and returns the index.
pub fn parse_chunk_name(artifact: &str, chunk_name: &str) -> Result<u64, TransferError> {
    validate_artifact_name(artifact)?;
    validate_artifact_name(chunk_name)?;

    let index = chunk_index(chunk_name).ok_or_else(|| {
        TransferError::InvalidName(format!("chunk name has no index: {chunk_name}"))
    })?;

    if chunk_name != format!("{artifact}-{index}") {
        return Err(TransferError::InvalidName(format!(
            "chunk {chunk_name} does not belong to {artifact}"
        )));
    }

    Ok(index)
}
