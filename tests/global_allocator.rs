//! Runs with the arena installed as the process allocator. The libtest
//! harness is disabled because it needs over-aligned allocations.

use memarena::{ArenaConfig, LockedArena};

#[global_allocator]
static ALLOCATOR: LockedArena = LockedArena::new(ArenaConfig::new(16 << 20, 16));

fn inspection_does_not_allocate() {
    let live: Vec<Box<[u8; 48]>> = (0..32).map(|_| Box::new([7u8; 48])).collect();
    let text = String::from("kept alive across the inspection");

    let (stats, checked) = ALLOCATOR.with(|arena| (arena.stats(), arena.check_invariants()));

    assert_eq!(Ok(()), checked);
    assert_eq!(16 << 20, stats.covered());
    assert!(stats.allocated_blocks >= live.len() + 1);
    assert!(stats.free_blocks >= 1);
    assert!(live.iter().all(|block| block.iter().all(|&byte| byte == 7)));
    assert_eq!(32, text.len());
}

fn freed_memory_merges_under_the_global_allocator() {
    let before = ALLOCATOR.with(|arena| arena.stats());

    let blocks: Vec<Vec<u8>> = (1..=16).map(|len| vec![0u8; len * 100]).collect();
    drop(blocks);

    let after = ALLOCATOR.with(|arena| arena.stats());

    assert_eq!(Ok(()), ALLOCATOR.with(|arena| arena.check_invariants()));
    assert_eq!(before.allocated_blocks, after.allocated_blocks);
    assert_eq!(16 << 20, after.covered());
}

fn main() {
    inspection_does_not_allocate();
    freed_memory_merges_under_the_global_allocator();
    println!("global allocator: ok");
}
