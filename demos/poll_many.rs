//! Polls several simulated flow controllers concurrently.
//!
//! Each controller owns its own connection, so their exchanges overlap while
//! each device still sees strictly one request at a time.
//!
//! ```text
//! cargo run --example poll_many
//! RUST_LOG=mfc=debug cargo run --example poll_many
//! ```

use std::time::Duration;

use anyhow::Context;
use mfc::{ControllerConfig, FlowController, Model, Role, Simulator, Value};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let models = [
        Model::Scaled { max_flow: 10.0 },
        Model::Float {
            max_flow: 20.0,
            analog: false,
        },
        Model::Float {
            max_flow: 5.0,
            analog: true,
        },
        Model::Ethercat { max_flow: 2.0 },
    ];

    let mut tasks = JoinSet::new();
    for (i, model) in models.into_iter().enumerate() {
        let sim = Simulator::new(model);
        sim.set_latency(Duration::from_millis(20));
        sim.set_value(Role::Flow, Value::Number(model.max_flow() / 2.0))?;

        tasks.spawn(async move {
            let config = ControllerConfig::simulated(sim);
            FlowController::session(config, |mfc| async move {
                if mfc.model().catalog().supports(Role::Gas) {
                    mfc.set_gas("N2").await?;
                }
                mfc.set(mfc.max_flow() / 4.0).await?;
                let mut readings = Vec::new();
                for _ in 0..3 {
                    readings.push(mfc.get().await?);
                }
                Ok((i, model, readings))
            })
            .await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (i, model, readings) = joined.context("poll task panicked")??;
        for reading in readings {
            println!("[{i}] {model}: {}", serde_json::to_string(&reading)?);
        }
    }
    Ok(())
}
