use anyhow::Result;
use chunkwise::testing::*;
use chunkwise::{Accumulate, BufferLen, ChunkIterator, IterError, MemoryStore, Workers};
use std::sync::Arc;

/// Five files of 3, 0, 4, 2 and 6 rows, idx 0..15.
fn five_files() -> Result<ChunkIterator<MemoryStore>> {
    let store = event_store(
        &[("a.pq", 3), ("b.pq", 0), ("c.pq", 4), ("d.pq", 2), ("e.pq", 6)],
        "evt",
    )?;
    ChunkIterator::builder(store)
        .files(["*.pq"])
        .groups("evt")
        .buffer_len(BufferLen::Rows(2))
        .build()
}

fn all_workers() -> Vec<Workers> {
    vec![
        Workers::Sequential,
        Workers::Count(1),
        Workers::Count(2),
        Workers::Count(3),
        Workers::Count(8),
    ]
}

#[test]
fn map_is_independent_of_worker_count() -> Result<()> {
    let mut it = five_files()?;
    for workers in all_workers() {
        let label = format!("{workers:?}");
        let idx: Vec<u64> = it
            .try_map(|block, _| column_u64(block, "idx"), workers)?
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(idx, (0..15).collect::<Vec<_>>(), "{label}");
    }

    // One worker reads the same blocks as no workers
    let seq = it.map(|block, _| block.len(), Workers::Sequential)?;
    let one = it.map(|block, _| block.len(), Workers::Count(1))?;
    assert_eq!(seq, one);
    Ok(())
}

#[test]
fn map_sees_each_shard_iterator() -> Result<()> {
    let mut it = five_files()?;
    let starts = it.map(|_, shard| shard.current_i_entry(), Workers::Sequential)?;
    assert_eq!(starts, vec![0, 2, 4, 6, 8, 10, 12, 14]);

    let files = it.map(|_, shard| shard.files().len(), Workers::Count(5))?;
    assert!(files.iter().all(|n| *n == 1));
    Ok(())
}

#[test]
fn partitioning_leaves_the_source_alone() -> Result<()> {
    let mut it = five_files()?;
    it.read(4, None)?;

    let mut shards = it.generate_workers(3)?;
    assert_eq!(shards.len(), 3);
    let files: Vec<_> = shards.iter().flat_map(|s| s.files().to_vec()).collect();
    assert_eq!(files, it.files().to_vec());

    let mut total = 0;
    for shard in &mut shards {
        total += shard.len()?;
    }
    assert_eq!(total, 15);

    assert_eq!(it.current_i_entry(), 4);
    assert_column_eq(it.buffer(), "idx", &[4, 5]);
    Ok(())
}

#[test]
fn zero_workers_is_an_error() -> Result<()> {
    let mut it = five_files()?;
    let err = it.generate_workers(0).err().expect("zero workers");
    assert!(matches!(
        err.downcast_ref::<IterError>(),
        Some(IterError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn shards_are_rebased() -> Result<()> {
    let mut it = five_files()?;
    // Resolve every count before splitting
    assert_eq!(it.len()?, 15);

    let mut shards = it.generate_workers(2)?;
    let second = &mut shards[1];
    assert_eq!(second.files().len(), 3);
    assert_eq!(second.len()?, 12);
    assert_column_eq(second.read(0, None)?, "idx", &[3, 4]);
    assert_eq!(second.current_global_entries()?, vec![0, 1]);
    Ok(())
}

#[test]
fn bounded_window_is_split_across_shards() -> Result<()> {
    let store = event_store(
        &[("a.pq", 3), ("b.pq", 0), ("c.pq", 4), ("d.pq", 2), ("e.pq", 6)],
        "evt",
    )?;
    let mut it = ChunkIterator::builder(store)
        .files(["*.pq"])
        .groups("evt")
        .i_start(2)
        .n_entries(10)
        .buffer_len(BufferLen::Rows(2))
        .build()?;

    for workers in all_workers() {
        let label = format!("{workers:?}");
        let idx: Vec<u64> = it
            .try_map(|block, _| column_u64(block, "idx"), workers)?
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(idx, (2..12).collect::<Vec<_>>(), "{label}");
    }
    Ok(())
}

#[test]
fn selections_survive_partitioning() -> Result<()> {
    let store = event_store(&[("a.pq", 3), ("c.pq", 4), ("e.pq", 6)], "evt")?;
    let mut it = ChunkIterator::builder(store)
        .files(["*.pq"])
        .groups("evt")
        .entry_list(vec![0, 2, 5, 6, 12])
        .buffer_len(BufferLen::Rows(2))
        .build()?;

    for workers in all_workers() {
        let sums = it.accumulate(
            |block, _| column_u64(block, "idx").map(|v| v.iter().sum::<u64>()).unwrap_or(0),
            Accumulate::add_assign(),
            workers,
        )?;
        assert_eq!(sums, Some(25));
    }
    Ok(())
}

#[test]
fn accumulate_sums_block_results() -> Result<()> {
    let mut it = five_files()?;
    for workers in all_workers() {
        let total = it.accumulate(|block, _| block.len(), Accumulate::add_assign(), workers)?;
        assert_eq!(total, Some(15));
    }

    let total = it.accumulate(
        |block, _| block.len(),
        Accumulate::add_assign().init(100),
        Workers::Sequential,
    )?;
    assert_eq!(total, Some(115));
    Ok(())
}

#[test]
fn accumulate_keeps_block_order() -> Result<()> {
    let mut it = five_files()?;
    let expected: Vec<u64> = (0..15).collect();

    let in_place = Accumulate::in_place(|acc: &mut Vec<u64>, v: Vec<u64>| acc.extend(v))
        .init(Vec::new());
    let idx = it.try_accumulate(|block, _| column_u64(block, "idx"), in_place, Workers::Count(3))?;
    assert_eq!(idx, Some(expected.clone()));

    let returning = Accumulate::returning(|mut acc: Vec<u64>, v: Vec<u64>| {
        acc.extend(v);
        acc
    });
    let idx = it.try_accumulate(|block, _| column_u64(block, "idx"), returning, Workers::Count(4))?;
    assert_eq!(idx, Some(expected));
    Ok(())
}

#[test]
fn accumulate_with_custom_merge() -> Result<()> {
    let mut it = five_files()?;

    let max = Accumulate::returning(|a: u64, b: u64| a.max(b));
    let top = it.try_accumulate(
        |block, _| column_u64(block, "idx").map(|v| v.into_iter().max().unwrap_or(0)),
        max,
        Workers::Count(3),
    )?;
    assert_eq!(top, Some(14));

    // Blocks per shard are summed, shards keep the largest count.
    // a.pq and b.pq give 2 blocks, c.pq to e.pq give 6.
    let busiest = Accumulate::add_assign().merge_in_place(|a: &mut usize, b| *a = (*a).max(b));
    let n = it.accumulate(|_, _| 1usize, busiest, Workers::Count(2))?;
    assert_eq!(n, Some(6));

    let counts = Accumulate::fold_into(
        vec![0usize; 4],
        |acc: &mut Vec<usize>, channels: Vec<u64>| {
            for c in channels {
                acc[c as usize] += 1;
            }
            Ok(())
        },
        |acc: &mut Vec<usize>, other: Vec<usize>| {
            for (a, b) in acc.iter_mut().zip(other) {
                *a += b;
            }
            Ok(())
        },
    );
    let counts = it.try_accumulate(|block, _| column_u64(block, "channel"), counts, Workers::Count(3))?;
    assert_eq!(counts, Some(vec![4, 4, 4, 3]));
    Ok(())
}

#[test]
fn accumulate_on_an_existing_pool() -> Result<()> {
    let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build()?);
    let mut it = five_files()?;
    let total = it.accumulate(
        |block, _| block.len(),
        Accumulate::add_assign(),
        Workers::Pool(Arc::clone(&pool), 4),
    )?;
    assert_eq!(total, Some(15));

    let sizes = it.map(|block, _| block.len(), Workers::Pool(pool, 5))?;
    assert_eq!(sizes.iter().sum::<usize>(), 15);
    Ok(())
}

#[test]
fn nothing_to_accumulate() -> Result<()> {
    let store = two_file_store()?;
    let mut it = ChunkIterator::builder(store)
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .entry_list(Vec::<u64>::new())
        .build()?;

    for workers in [Workers::Sequential, Workers::Count(2)] {
        let total = it.accumulate(|block, _| block.len(), Accumulate::add_assign(), workers)?;
        assert_eq!(total, None);
    }
    let total = it.accumulate(
        |block, _| block.len(),
        Accumulate::add_assign().init(7),
        Workers::Sequential,
    )?;
    assert_eq!(total, Some(7));
    assert!(it.map(|block, _| block.len(), Workers::Count(2))?.is_empty());
    Ok(())
}

#[test]
fn friends_follow_each_shard() -> Result<()> {
    let store = two_file_store_with_friend()?;
    let aux = ChunkIterator::builder(store.clone())
        .files(["g1.pq", "g2.pq"])
        .groups("aux")
        .build()?;
    let mut it = ChunkIterator::builder(store)
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .buffer_len(BufferLen::Rows(3))
        .friend(aux)
        .build()?;

    for workers in all_workers() {
        let label = format!("{workers:?}");
        let pairs = it.try_map(
            |block, _| Ok((column_u64(block, "idx")?, column_u64(block, "tag")?)),
            workers,
        )?;
        let (idx, tag): (Vec<Vec<u64>>, Vec<Vec<u64>>) = pairs.into_iter().unzip();
        let idx: Vec<u64> = idx.into_iter().flatten().collect();
        let tag: Vec<u64> = tag.into_iter().flatten().collect();
        assert_eq!(idx, (0..12).collect::<Vec<_>>(), "{label}");
        assert_eq!(tag, idx, "{label}");
    }
    Ok(())
}

#[test]
fn global_list_is_rebuilt_after_partitioning() -> Result<()> {
    let mut it = ChunkIterator::builder(two_file_store()?)
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .entry_list(vec![10, 1, 3])
        .build()?;

    let mut shards = it.generate_workers(1)?;
    let rebuilt = shards[0].global_entry_list()?;
    assert_eq!(rebuilt.as_deref(), Some(&[1u64, 3, 10][..]));
    assert_eq!(rebuilt, it.global_entry_list()?);
    Ok(())
}
