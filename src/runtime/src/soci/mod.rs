//! SOCI index building and selection.

mod builder;
pub mod ztoc;

pub use builder::{
    BuildOptions, IndexBuilder, IndexDescriptorInfo, SociIndexBuilder, BUILD_TOOL_IDENTIFIER,
};

use soci_wrapper_core::error::{Result, SociError};

/// Pick the authoritative index: the one built most recently.
///
/// When several share the latest timestamp the greatest digest wins; a
/// single build should never record two indexes at the same instant, so
/// the tie is logged.
pub fn select_latest(infos: Vec<IndexDescriptorInfo>) -> Result<IndexDescriptorInfo> {
    let latest = infos
        .iter()
        .map(|info| info.created_at)
        .max()
        .ok_or_else(|| SociError::BuildError("No SOCI indices found in OCI store".to_string()))?;

    let mut newest: Vec<IndexDescriptorInfo> = infos
        .into_iter()
        .filter(|info| info.created_at == latest)
        .collect();
    newest.sort_by(|a, b| a.descriptor.digest.cmp(&b.descriptor.digest));

    if newest.len() > 1 {
        tracing::warn!(
            count = newest.len(),
            created_at = %latest,
            "Multiple SOCI indices share the latest creation time; picking the greatest digest"
        );
    }

    newest
        .pop()
        .ok_or_else(|| SociError::BuildError("No SOCI indices found in OCI store".to_string()))
}
