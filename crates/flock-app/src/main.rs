use anyhow::Result;
use flock_core::{SwarmConfig, SwarmWorld};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    let world = bootstrap_world()?;
    info!(
        agents = world.agent_count(),
        width = world.config().viewport_width,
        height = world.config().viewport_height,
        shape = world.shape_kind(),
        "starting flock simulation shell"
    );
    flock_render::run(world)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_world() -> Result<SwarmWorld> {
    let mut config = SwarmConfig::default();
    if let Some(agents) = env_u64("FLOCK_AGENTS") {
        config.agent_count = agents.min(u64::from(u32::MAX)) as u32;
    }
    if let Some(seed) = env_u64("FLOCK_SEED") {
        config.rng_seed = Some(seed);
    }
    let world = SwarmWorld::new(config)?;
    Ok(world)
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}
