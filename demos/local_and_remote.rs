//! # Demo: local_and_remote
//!
//! A build dispatcher reserving cores from the local machine and two remote agents.
//!
//! Demonstrates how to:
//! - Build a [`WorkerPool`] with a local provider, remote providers and the built-in
//!   [`LogWriter`].
//! - Run a burst of actions with mixed [`CorePreference`]s.
//! - Add an agent while work is queued and remove one afterwards.
//! - Shut the pool down and check that every slot came back.
//!
//! ## Flow
//! ```text
//! main()
//!   ├─► WorkerPool::builder(cfg).build()
//!   │     ├─► SingleSourceFulfiller (local, 2 slots)
//!   │     └─► MultipleSourceFulfiller (agent-1)
//!   ├─► spawn 24 actions: reserve_core → run → release
//!   ├─► add agent-2 while actions are queued
//!   ├─► join actions, remove agent-1
//!   └─► shutdown()
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example local_and_remote --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use corevisor::{
    Config, CoreLocality, CorePreference, LogWriter, ProviderRef, SemaphoreCoreProvider, SlotCore,
    Subscribe, WorkerPool,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cfg = Config {
        remote_delay: Duration::from_millis(200),
        grace: Duration::from_secs(5),
        ..Config::default()
    };

    let local = SemaphoreCoreProvider::arc("local", CoreLocality::Local, 2);
    let agent_1 = SemaphoreCoreProvider::arc("agent-1", CoreLocality::Remote, 3);
    let agent_2 = SemaphoreCoreProvider::arc("agent-2", CoreLocality::Remote, 4);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let initial: Vec<ProviderRef<SlotCore>> = vec![agent_1.clone()];
    let pool = WorkerPool::<SlotCore>::builder(cfg)
        .with_local_provider(local.clone())
        .with_remote_providers(initial)
        .with_subscribers(subs)
        .build()?;

    let token = CancellationToken::new();
    let mut actions = JoinSet::new();
    for i in 0..24u64 {
        let pool = Arc::clone(&pool);
        let token = token.clone();
        let preference = match i % 3 {
            0 => CorePreference::RequireLocal,
            1 => CorePreference::PreferLocal,
            _ => CorePreference::PreferRemote,
        };
        actions.spawn(async move {
            let mut request = pool.reserve_core(preference, &token).await?;
            let core = request.wait_for_core(&token).await?;
            let line = format!(
                "action #{i:02} ({preference:?}) ran on {} slot {}",
                core.provider(),
                core.serial()
            );
            tokio::time::sleep(Duration::from_millis(50 + 10 * (i % 4))).await;
            request.release();
            Ok::<_, corevisor::CoreError>(line)
        });
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.add_remote_provider(agent_2.clone())?;

    while let Some(res) = actions.join_next().await {
        println!("{}", res??);
    }

    pool.remove_remote_provider("agent-1");
    println!("statistics after the burst: {:?}", pool.statistics());

    pool.shutdown().await?;
    println!(
        "slots free: local={} agent-1={} agent-2={}",
        local.available(),
        agent_1.available(),
        agent_2.available()
    );
    Ok(())
}
