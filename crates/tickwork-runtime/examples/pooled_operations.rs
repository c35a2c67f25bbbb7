//! Runs a few block-filling operations through a two-slot pool on a tokio tick scheduler.
//!
//! Run with: RUST_LOG=debug cargo run -p tickwork-runtime --example pooled_operations

use std::sync::Arc;
use std::time::Duration;

use tickwork_kernel::{Actor, Supervisor};
use tickwork_runtime::{
    OperationError, RunContext, SimpleOperationScheduler, SimpleWorld, Step, StepOperation,
    TickworkConfig, TokioTickScheduler,
};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[supervisor]
quota = 8

[operations]
pool_size = 2
slice_budget_ms = 2
"#;

struct Console;

impl Actor for Console {
    fn name(&self) -> String {
        "console".into()
    }

    fn print_raw(&self, message: &str) {
        println!("{message}");
    }

    fn print_error(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Sets `blocks` blocks, as many as fit in each slice's budget.
fn fill(blocks: u64, limit: Option<u64>) -> Arc<dyn tickwork_runtime::Operation> {
    let mut placed = 0_u64;
    StepOperation::named("fill", move |run: &RunContext| {
        while placed < blocks && run.should_continue() {
            placed += 1;
            if limit.is_some_and(|limit| placed > limit) {
                return Err(OperationError::LimitExceeded { limit: placed - 1 });
            }
            std::thread::sleep(Duration::from_micros(50));
        }
        Ok(if placed == blocks { Step::Done } else { Step::Continue })
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = TickworkConfig::from_toml_str(CONFIG)?;
    let supervisor = Supervisor::from_config(&config.supervisor)?;
    let scheduler = SimpleOperationScheduler::new(supervisor, &config.operations)?;
    let world = SimpleWorld::new(
        "overworld",
        Arc::new(TokioTickScheduler::new(
            tokio::runtime::Handle::current(),
            Duration::from_millis(50),
        )),
    );
    let console: Arc<dyn Actor> = Arc::new(Console);

    let handles = vec![
        scheduler.submit(fill(200, None), &world, Some("small"), Some(&console)),
        scheduler.submit(fill(2_000, None), &world, Some("large"), Some(&console)),
        scheduler.submit(fill(1_000, Some(300)), &world, Some("limited"), Some(&console)),
    ];

    for snapshot in scheduler.supervisor().snapshot() {
        println!("{}", serde_json::to_string(&snapshot)?);
    }

    for handle in handles {
        let name = handle.name().unwrap_or("unnamed").to_string();
        let slices = handle.clone();
        match handle.await {
            Ok(op) => println!("{name}: {} finished after {} slices", op.kind(), slices.slices()),
            Err(err) => println!("{name}: {err}"),
        }
    }
    Ok(())
}
