//! Shows how the two coalescing policies treat the same free pattern.
//!
//! Run with `RUST_LOG=memarena=trace` to follow every split and merge.

use memarena::{Arena, ArenaConfig, CoalescePolicy};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

fn run(policy: CoalescePolicy) {
    let mut arena = Arena::new(ArenaConfig::new(4096, 8).with_coalesce(policy));

    let blocks: Vec<_> = (0..6)
        .map(|_| arena.alloc(100))
        .collect::<Result<_, _>>()
        .unwrap_or_default();

    if blocks.len() < 6 {
        eprintln!("arena too small for the demo");
        return;
    }

    unsafe {
        // Free 0, 2 and then 1, so 0..=2 form one physical run.
        for index in [0, 2, 1, 4] {
            if let Err(error) = arena.free(blocks[index]) {
                eprintln!("free failed: {error}");
            }
        }
    }

    info!(?policy, free_blocks = arena.free_blocks().count(), "after frees");
    arena.log_free_list();
    println!("{policy:?}:\n{}", arena.dump());

    match arena.alloc(300) {
        Ok(ptr) => println!("300 bytes fit at {ptr:?}\n"),
        Err(error) => println!("300 bytes did not fit: {error}\n"),
    }
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    run(CoalescePolicy::SinglePass);
    run(CoalescePolicy::UntilStable);
}
