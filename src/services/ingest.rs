//! Archive ingestion: normalize, deduplicate, store and thread.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{DigestError, Result};
use crate::ingest::{dedup_batch, normalize};
use crate::threading::{Placement, ThreadReconstructor};
use crate::types::ArchiveFormat;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Entries that normalized into a message
    pub parsed: usize,
    pub inserted: usize,
    /// Repeats within the batch plus identifiers already stored
    pub duplicates: usize,
    /// Entries rejected by the normalizer
    pub malformed: usize,
    pub threads_created: usize,
    pub merges: usize,
}

/// Ingest one archive already in memory.
///
/// Malformed entries are logged and counted; storage failures abort.
pub fn ingest_bytes(reconstructor: &ThreadReconstructor, raw: &[u8], format: ArchiveFormat) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut stream = dedup_batch(normalize(raw, format));

    for item in &mut stream {
        let msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                warn!(format = format.as_str(), "Skipping malformed entry: {}", e);
                report.malformed += 1;
                continue;
            }
        };
        report.parsed += 1;

        match reconstructor.insert(&msg)? {
            Placement::Duplicate => report.duplicates += 1,
            Placement::Created(_) => {
                report.inserted += 1;
                report.threads_created += 1;
            }
            Placement::Attached(_) => report.inserted += 1,
            Placement::Merged { absorbed, .. } => {
                report.inserted += 1;
                report.merges += absorbed;
            }
        }
    }
    report.duplicates += stream.duplicates();

    info!(
        format = format.as_str(),
        parsed = report.parsed,
        inserted = report.inserted,
        duplicates = report.duplicates,
        malformed = report.malformed,
        "Archive ingested"
    );
    Ok(report)
}

/// Read and ingest an archive file; the format is inferred from the
/// extension unless given.
pub fn ingest_path(
    reconstructor: &ThreadReconstructor,
    path: &Path,
    format: Option<ArchiveFormat>,
) -> Result<IngestReport> {
    let format = format
        .or_else(|| ArchiveFormat::from_path(path))
        .ok_or_else(|| DigestError::InvalidInput(format!("cannot infer archive format of {}", path.display())))?;
    let raw = fs::read(path)?;
    info!("Ingesting {} as {}", path.display(), format.as_str());
    ingest_bytes(reconstructor, &raw, format)
}
