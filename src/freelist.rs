use tracing::trace;

use crate::{
    block::{Header, Link},
    config::CoalescePolicy,
    region::Region,
};

/// Linked list to keep track of free blocks.
///
/// The list is intrusive: the `next` / `prev` links live in the headers of
/// the free blocks themselves, so the only state kept here is the head. Links
/// are arena offsets and the list is kept sorted by them, which is the same as
/// sorting by address.
///
/// ```text
///                     Free List (address order)
///
///    head                  next                        next
///     |     +----------------------------+  +---------------------+
///     v     |                            v  |                     v
/// +--------------+-------+-------+--------------+-------+--------------+
/// |  Block(free) | Block | Block |  Block(free) | Block |  Block(free) |
/// +--------------+-------+-------+--------------+-------+--------------+
///           ^                            |  ^                     |
///           +----------------------------+  +---------------------+
///                      prev                         prev
/// ```
///
/// `next` / `prev` encode the order of the list, not physical adjacency:
/// two free blocks are physically adjacent only when the end of the first
/// (offset + header + size) is the offset of the second.
pub(crate) struct FreeList {
    head: Link,
}

pub(crate) struct Iter<'a> {
    region: &'a Region,
    current: Link,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Makes the block at `block` a free block of `size` usable bytes and
    /// links it in at its address-ordered position.
    ///
    /// The position is right before the first entry with a higher offset, or
    /// at the tail when `block` is past every entry. Covers the empty list,
    /// a new head, a new tail and a splice between two entries. A block that
    /// is already in the list is left untouched.
    pub fn insert(&mut self, region: &mut Region, block: usize, size: usize) {
        let mut prev: Link = None;
        let mut current = self.head;

        while let Some(offset) = current {
            if offset == block {
                trace!(block, "block already in the free list");
                return;
            }

            if offset > block {
                break;
            }

            prev = current;
            current = region.header(offset).next();
        }

        let mut header = Header::new(size);
        header.set_prev(prev);
        header.set_next(current);
        region.write_header(block, header);

        match prev {
            Some(prev) => region.update(prev, |h| h.set_next(Some(block))),
            None => self.head = Some(block),
        }

        if let Some(next) = current {
            region.update(next, |h| h.set_prev(Some(block)));
        }

        trace!(block, size, ?prev, next = ?current, "inserted free block");
    }

    /// Unlinks `block` from the list.
    ///
    /// A block that is not in the list is ignored: the neighbours are only
    /// rewired after the block has been found by walking from the head.
    pub fn remove(&mut self, region: &mut Region, block: usize) {
        let header = region.header(block);

        if self.head == Some(block) {
            self.head = header.next();

            if let Some(next) = self.head {
                region.update(next, |h| h.set_prev(None));
            }
        } else {
            let Some(prev) = self.predecessor_of(region, block) else {
                trace!(block, "block not in the free list");
                return;
            };

            region.update(prev, |h| h.set_next(header.next()));

            if let Some(next) = header.next() {
                region.update(next, |h| h.set_prev(Some(prev)));
            }
        }

        region.update(block, Header::unlink);

        trace!(block, size = header.size, "removed free block");
    }

    /// The entry whose `next` is `block`.
    fn predecessor_of(&self, region: &Region, block: usize) -> Link {
        let mut current = self.head;

        while let Some(offset) = current {
            let next = region.header(offset).next();

            if next == Some(block) {
                return Some(offset);
            }

            // Sorted list: nothing past `block` can precede it.
            if offset > block {
                return None;
            }

            current = next;
        }

        None
    }

    /// Returns the first block in address order that can hold `size` bytes.
    ///
    /// This implementation uses the first-fit algorithm: the scan stops at
    /// the first block whose size is at least `size`.
    pub fn find_free_block(&self, region: &Region, size: usize) -> Link {
        self.iter(region)
            .find(|&(_, header)| header.size >= size)
            .map(|(offset, _)| offset)
    }

    /// Merges physically adjacent free blocks and returns how many merges
    /// were made.
    ///
    /// The surviving block is always the lower one: it absorbs the header
    /// and payload of its successor, whose header becomes plain payload.
    /// With [`CoalescePolicy::SinglePass`] the walk ends after the first
    /// merge. With [`CoalescePolicy::UntilStable`] the walk stays on the
    /// surviving block after each merge, so a whole run of adjacent blocks
    /// collapses and one walk leaves no adjacent pair behind.
    pub fn coalesce(&mut self, region: &mut Region, policy: CoalescePolicy) -> usize {
        let mut merged = 0;
        let mut current = self.head;

        while let Some(offset) = current {
            let mut header = region.header(offset);

            let Some(next) = header.next() else {
                break;
            };

            if region.block_end(offset, header.size) != next {
                current = Some(next);
                continue;
            }

            let absorbed = region.header(next);
            header.size += region.header_size() + absorbed.size;
            header.set_next(absorbed.next());
            region.write_header(offset, header);

            if let Some(after) = absorbed.next() {
                region.update(after, |h| h.set_prev(Some(offset)));
            }

            trace!(block = offset, absorbed = next, size = header.size, "merged free blocks");
            merged += 1;

            if policy == CoalescePolicy::SinglePass {
                break;
            }
        }

        merged
    }

    /// Walks the list in address order, yielding each block's offset and header.
    pub fn iter<'a>(&self, region: &'a Region) -> Iter<'a> {
        Iter {
            region,
            current: self.head,
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = (usize, Header);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.current?;
        let header = self.region.header(offset);

        self.current = header.next();

        Some((offset, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;

    const ALIGNMENT: usize = 16;

    fn region() -> Region {
        Region::reserve(&ArenaConfig::new(4096, ALIGNMENT)).unwrap()
    }

    fn offsets(list: &FreeList, region: &Region) -> Vec<usize> {
        list.iter(region).map(|(offset, _)| offset).collect()
    }

    /// Checks that `prev` mirrors `next` all along the list.
    fn assert_links(list: &FreeList, region: &Region) {
        let mut prev = None;
        for (offset, header) in list.iter(region) {
            assert_eq!(prev, header.prev(), "prev link of block {offset}");
            prev = Some(offset);
        }
    }

    #[test]
    fn new_list_is_empty() {
        let region = region();
        let list = FreeList::new();

        assert!(list.iter(&region).next().is_none());
        assert_eq!(None, list.find_free_block(&region, 16));
    }

    #[test]
    fn insert_keeps_address_order() {
        let mut region = region();
        let mut list = FreeList::new();

        // Tail, head, middle, in that order.
        list.insert(&mut region, 1024, 64);
        list.insert(&mut region, 3072, 64);
        list.insert(&mut region, 0, 64);
        list.insert(&mut region, 2048, 64);

        assert_eq!(vec![0, 1024, 2048, 3072], offsets(&list, &region));
        assert_links(&list, &region);
    }

    #[test]
    fn second_insert_into_single_entry_list_compares_addresses() {
        let mut region = region();

        let mut list = FreeList::new();
        list.insert(&mut region, 512, 32);
        list.insert(&mut region, 128, 32);
        assert_eq!(vec![128, 512], offsets(&list, &region));
        assert_eq!(Some(128), list.head);
        assert_links(&list, &region);

        let mut list = FreeList::new();
        list.insert(&mut region, 128, 32);
        list.insert(&mut region, 512, 32);
        assert_eq!(vec![128, 512], offsets(&list, &region));
        assert_links(&list, &region);
    }

    #[test]
    fn insert_sets_the_size() {
        let mut region = region();
        let mut list = FreeList::new();

        list.insert(&mut region, 256, 80);

        assert_eq!(80, region.header(256).size);
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut region = region();
        let mut list = FreeList::new();

        list.insert(&mut region, 0, 64);
        list.insert(&mut region, 512, 64);
        list.insert(&mut region, 512, 64);

        assert_eq!(vec![0, 512], offsets(&list, &region));
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut region = region();
        let mut list = FreeList::new();
        for offset in [0, 512, 1024, 1536] {
            list.insert(&mut region, offset, 64);
        }

        list.remove(&mut region, 1024);
        assert_eq!(vec![0, 512, 1536], offsets(&list, &region));
        assert_links(&list, &region);

        list.remove(&mut region, 0);
        assert_eq!(vec![512, 1536], offsets(&list, &region));
        assert_eq!(None, region.header(512).prev());

        list.remove(&mut region, 1536);
        assert_eq!(vec![512], offsets(&list, &region));
        assert_eq!(None, region.header(512).next());

        list.remove(&mut region, 512);
        assert_eq!(None, list.head);
    }

    #[test]
    fn removed_block_has_no_links() {
        let mut region = region();
        let mut list = FreeList::new();
        for offset in [0, 512, 1024] {
            list.insert(&mut region, offset, 64);
        }

        list.remove(&mut region, 512);

        let header = region.header(512);
        assert_eq!(None, header.next());
        assert_eq!(None, header.prev());
    }

    #[test]
    fn removing_an_absent_block_is_a_no_op() {
        let mut region = region();
        let mut list = FreeList::new();
        list.insert(&mut region, 0, 64);
        list.insert(&mut region, 1024, 64);
        region.write_header(512, Header::new(64));

        list.remove(&mut region, 512);

        assert_eq!(vec![0, 1024], offsets(&list, &region));
        assert_links(&list, &region);
    }

    #[test]
    fn first_fit_picks_lowest_address() {
        let mut region = region();
        let mut list = FreeList::new();
        list.insert(&mut region, 0, 32);
        list.insert(&mut region, 512, 256);
        list.insert(&mut region, 1024, 128);

        assert_eq!(Some(0), list.find_free_block(&region, 32));
        assert_eq!(Some(512), list.find_free_block(&region, 100));
        assert_eq!(None, list.find_free_block(&region, 512));
    }

    #[test]
    fn coalesce_merges_adjacent_pair() {
        let mut region = region();
        let header_size = region.header_size();
        let mut list = FreeList::new();

        let second = header_size + 96;
        list.insert(&mut region, 0, 96);
        list.insert(&mut region, second, 208);

        let merged = list.coalesce(&mut region, CoalescePolicy::UntilStable);

        assert_eq!(1, merged);
        assert_eq!(vec![0], offsets(&list, &region));
        assert_eq!(96 + header_size + 208, region.header(0).size);
    }

    #[test]
    fn coalesce_leaves_gaps_alone() {
        let mut region = region();
        let header_size = region.header_size();
        let mut list = FreeList::new();

        list.insert(&mut region, 0, 96);
        list.insert(&mut region, header_size + 96 + 64, 64);

        assert_eq!(0, list.coalesce(&mut region, CoalescePolicy::UntilStable));
        assert_eq!(2, list.iter(&region).count());
    }

    #[test]
    fn single_pass_stops_after_first_merge() {
        let mut region = region();
        let header_size = region.header_size();
        let block = header_size + 64;
        let mut list = FreeList::new();
        for i in 0..3 {
            list.insert(&mut region, i * block, 64);
        }

        assert_eq!(1, list.coalesce(&mut region, CoalescePolicy::SinglePass));
        assert_eq!(vec![0, 2 * block], offsets(&list, &region));
        assert_links(&list, &region);

        assert_eq!(1, list.coalesce(&mut region, CoalescePolicy::SinglePass));
        assert_eq!(vec![0], offsets(&list, &region));
    }

    #[test]
    fn until_stable_collapses_a_run() {
        let mut region = region();
        let header_size = region.header_size();
        let block = header_size + 64;
        let mut list = FreeList::new();
        for i in 0..4 {
            list.insert(&mut region, i * block, 64);
        }
        // Not adjacent to the run.
        list.insert(&mut region, 8 * block, 64);

        assert_eq!(3, list.coalesce(&mut region, CoalescePolicy::UntilStable));
        assert_eq!(vec![0, 8 * block], offsets(&list, &region));
        assert_eq!(4 * 64 + 3 * header_size, region.header(0).size);
        assert_links(&list, &region);
    }
}
