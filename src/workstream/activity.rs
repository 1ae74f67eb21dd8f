//! Supervised lifecycle shared by every long-running activity
//!
//! Each activity follows `init -> process loop -> close`. The runner polls
//! the shared shutdown flag between `process` calls; every `process`
//! implementation is time-bounded, so an external shutdown is observed within
//! one unit of work. Any error raised by `init` or `process` is funneled into
//! the shutdown controller as the instance's cause, and `close` runs on every
//! exit path — clean, internal failure, or external request.

use crate::workstream::error::WorkstreamResult;
use crate::workstream::shutdown::ShutdownController;
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[async_trait]
pub(crate) trait Activity: Send + 'static {
    fn name(&self) -> String;

    async fn init(&mut self) -> WorkstreamResult<()> {
        Ok(())
    }

    /// One bounded unit of work
    async fn process(&mut self) -> WorkstreamResult<()>;

    async fn close(&mut self) {}
}

/// Run an activity to completion on its own task
pub(crate) fn spawn_supervised(
    mut activity: impl Activity,
    ctrl: Arc<ShutdownController>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = activity.name();
        info!("activity {} started", name);

        let result = async {
            activity.init().await?;
            while !ctrl.is_shutdown() {
                activity.process().await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!("activity {} failed: {}", name, e);
            ctrl.request(Some(e));
        }

        activity.close().await;
        info!("activity {} closed", name);
    })
}
