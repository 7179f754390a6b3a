//! Run callbacks once after a delay, with optional cancellation before they fire.
#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

pub mod cancellation;
pub mod config;
pub mod coordinator;
pub mod queue;
pub mod store;
pub mod task;

pub use queue::{DelayQueue, Error};
pub use task::TaskId;

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Run a long-lived task, logging how it ended.
///
/// A panic in one of these leaves the queue without a coordinator, so the process is terminated.
pub(crate) fn spawn<T>(name: &'static str, future: T) -> JoinHandle<()>
where
    T: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(future);

    tokio::spawn(async move {
        if let Err(err) = task.await {
            error!("{name}: task failed: {err}");
            std::process::exit(1);
        }
        debug!("{name}: task finished");
    })
}
