use std::ptr::NonNull;

use memarena::{Arena, ArenaConfig};
use tracing_subscriber::{EnvFilter, fmt};

fn log_alloc(addr: NonNull<u8>, requested: usize, arena: &Arena) {
    println!("Requested {requested} bytes of memory");
    println!(
        "Received this address: {addr:?} ({} usable bytes)",
        arena.usable_size(addr).unwrap_or(0)
    );
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // MEMARENA_ARENA_SIZE / MEMARENA_ALIGNMENT / MEMARENA_COALESCE override the defaults.
    let config = match ArenaConfig::load(None) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    let mut arena = Arena::new(config);

    let requests = [8usize, 8, 16];
    let mut addrs = Vec::new();

    for requested in requests {
        match arena.alloc(requested) {
            Ok(addr) => {
                log_alloc(addr, requested, &arena);
                addrs.push(addr);
            }
            Err(error) => eprintln!("allocation of {requested} bytes failed: {error}"),
        }
    }

    println!("\nFree list after allocating:\n{}", arena.dump());

    for addr in addrs {
        if let Err(error) = unsafe { arena.free(addr) } {
            eprintln!("free failed: {error}");
        }
    }

    println!("Free list after freeing:\n{}", arena.dump());
    println!("{:?}", arena.stats());
}
