//! Demonstrate the delay queue with tasks from a config file
#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::info;

use robotica_delay_queue::{
    config::{self, Environment},
    DelayQueue,
};

const MARGIN: Duration = Duration::from_millis(100);

#[derive(Deserialize)]
struct DemoTask {
    name: String,
    delay_ms: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DemoConfig {
    queue: config::Config,
    demo: Vec<DemoTask>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    info!(
        "Starting {}, version = {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let env = Environment::load()?;
    let config: DemoConfig = env.config()?;
    let queue = DelayQueue::new(&config.queue);

    let mut longest = Duration::ZERO;
    for task in config.demo {
        let delay = Duration::from_millis(task.delay_ms);
        longest = longest.max(delay);

        let name = task.name;
        let id = queue.push(delay, move || info!("{name}: fired")).await?;
        info!("{id}: scheduled after {delay:?}");
    }

    sleep(longest + MARGIN).await;

    let report = queue.shutdown().await?;
    info!("Finished: {report:?}");

    Ok(())
}
