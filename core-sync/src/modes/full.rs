//! Full: the pull half against fresh snapshots, then the push half.
//!
//! The local library is read again between the halves so the push half sees
//! what the pull half wrote.

use super::{pull, push};
use crate::context::SyncContext;
use crate::task::SyncTask;
use crate::types::SyncMode;
use crate::Result;
use tracing::info;

pub(super) async fn run(task: &mut SyncTask, ctx: &SyncContext) -> Result<()> {
    pull::run(task, ctx, SyncMode::Full).await?;

    info!("Pull half finished, pushing local state");
    task.reset_local();
    push::run(task, ctx).await
}
