//! Sequential media downloads with per-item status.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, trace, warn};

use vela_core::{DownloadRequest, ItemStatus, JobData, JobType, MediaDownloader, Result};

use crate::config::DelayRange;
use crate::handler::{JobContext, JobHandler};

/// Downloads items one at a time. Ordinary failures are recorded on the
/// item; a transport invalidation aborts the job with the remaining items
/// left unattempted.
pub struct DownloadHandler {
    downloader: Arc<dyn MediaDownloader>,
    delay: DelayRange,
}

impl DownloadHandler {
    pub fn new(downloader: Arc<dyn MediaDownloader>, delay: DelayRange) -> Self {
        Self { downloader, delay }
    }
}

/// Write the outcome of item `index` into the stored payload.
async fn record_item(ctx: &JobContext, index: usize, outcome: std::result::Result<(), String>) {
    ctx.update_data(move |data| {
        let JobData::Download { items, .. } = data else {
            return;
        };
        let Some(item) = items.get_mut(index) else {
            return;
        };
        match outcome {
            Ok(()) => {
                item.status = Some(ItemStatus::Completed);
                item.error = None;
            }
            Err(message) => {
                item.status = Some(ItemStatus::Failed);
                item.error = Some(message);
            }
        }
    })
    .await;
}

#[async_trait]
impl JobHandler for DownloadHandler {
    fn job_type(&self) -> JobType {
        JobType::Download
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let JobData::Download { items, .. } = ctx.data() else {
            return Err(ctx.payload_mismatch());
        };
        let items = ctx.limit(items.clone()).await;
        let total = items.len();

        // Items beyond the bulk limit are dropped from the job entirely.
        ctx.update_data(move |data| {
            if let JobData::Download { items, .. } = data {
                items.truncate(total);
            }
        })
        .await;

        let mut failed = 0;
        for (index, item) in items.iter().enumerate() {
            ctx.ensure_active()?;
            trace!(job_id = ?ctx.job_id(), filename = %item.filename, "Downloading");

            let request = DownloadRequest::from(item);
            let outcome = match self.downloader.download(std::slice::from_ref(&request)).await {
                Ok(result) if result.success => Ok(()),
                Ok(_) => Err("Download was not accepted".to_string()),
                Err(e) if e.is_fatal_transport() => {
                    error!(
                        job_id = ?ctx.job_id(),
                        filename = %item.filename,
                        remaining = total - index - 1,
                        error = %e,
                        "Download transport lost, aborting job"
                    );
                    record_item(ctx, index, Err(e.to_string())).await;
                    return Err(e);
                }
                Err(e) => Err(e.to_string()),
            };

            if let Err(message) = &outcome {
                failed += 1;
                warn!(job_id = ?ctx.job_id(), filename = %item.filename, error = %message, "Download failed");
            }
            record_item(ctx, index, outcome).await;
            ctx.report_progress(index + 1, total).await;

            if index + 1 < total {
                ctx.pause(self.delay.sample()).await?;
            }
        }

        info!(job_id = ?ctx.job_id(), total, failed, "Downloads finished");
        Ok(())
    }
}
