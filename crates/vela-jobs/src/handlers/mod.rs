//! Job handler implementations, one per job type.

pub mod download;
pub mod process_for_upscale;
pub mod purge;
pub mod relike;
pub mod unlike;
pub mod upscale;

#[cfg(test)]
pub(crate) mod testing;

pub use download::DownloadHandler;
pub use process_for_upscale::ProcessForUpscaleHandler;
pub use purge::PurgeHandler;
pub use relike::RelikeHandler;
pub use unlike::UnlikeHandler;
pub use upscale::UpscaleHandler;

use std::collections::HashSet;

/// Drop repeated ids, keeping first occurrences in order.
pub(crate) fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
