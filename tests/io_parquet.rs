#![cfg(feature = "io-parquet")]

use anyhow::Result;
use chunkwise::testing::*;
use chunkwise::{BufferLen, ChunkIterator, FieldMask, IterConfig, ParquetStore, Workers};

#[test]
fn root_group_reads_top_level_columns() -> Result<()> {
    let (dir, paths) = temp_event_files(&[5, 7], &["/"])?;
    assert_eq!(paths.len(), 2);

    let mut it = ChunkIterator::builder(ParquetStore::new())
        .files(["run*.parquet"])
        .base_path(dir.path())
        .groups("/")
        .buffer_len(BufferLen::Rows(4))
        .build()?;
    assert_eq!(it.files(), paths.as_slice());
    assert_eq!(it.len()?, 12);
    assert_eq!(block_sizes(&mut it)?, vec![4, 4, 4]);
    assert_eq!(collect_u64(&mut it, "idx")?, (0..12).collect::<Vec<_>>());

    let block = it.read(3, Some(4))?;
    assert_eq!(column_f64(block, "energy")?, vec![30.0, 40.0, 50.0, 60.0]);
    Ok(())
}

#[test]
fn struct_groups_with_field_mask() -> Result<()> {
    let (dir, _) = temp_event_files(&[5, 7], &["ch1", "ch2"])?;

    let mut it = ChunkIterator::builder(ParquetStore::new())
        .files(["run*.parquet"])
        .base_path(dir.path())
        .groups(["ch1", "ch2"])
        .field_mask(FieldMask::include(["idx"]))
        .buffer_len(BufferLen::Rows(5))
        .build()?;

    assert_eq!(it.len()?, 24);
    assert_eq!(it.groups(), &["ch1", "ch2", "ch1", "ch2"]);
    assert_eq!(it.buffer().field_names(), vec!["idx"]);

    let idx = collect_u64(&mut it, "idx")?;
    let expected: Vec<u64> = (0..5).chain(0..5).chain(5..12).chain(5..12).collect();
    assert_eq!(idx, expected);

    it.read(3, Some(4))?;
    assert_eq!(it.current_groups()?, vec!["ch1", "ch1", "ch2", "ch2"]);
    assert_eq!(it.current_local_entries()?, vec![3, 4, 0, 1]);
    Ok(())
}

#[test]
fn entry_list_reads_selected_rows() -> Result<()> {
    let (dir, _) = temp_event_files(&[5, 7], &["/"])?;
    let mut it = ChunkIterator::builder(ParquetStore::new())
        .files(["run*.parquet"])
        .base_path(dir.path())
        .groups("/")
        .entry_list(vec![1, 3, 4, 10, 11])
        .buffer_len(BufferLen::Rows(4))
        .build()?;

    assert_eq!(collect_u64(&mut it, "idx")?, vec![1, 3, 4, 10, 11]);
    assert_eq!(block_sizes(&mut it)?, vec![4, 1]);
    Ok(())
}

#[test]
fn repeated_entries_match_memory_store() -> Result<()> {
    let (dir, _) = temp_event_files(&[5, 7], &["/"])?;
    let mut on_disk = ChunkIterator::builder(ParquetStore::new())
        .files(["run*.parquet"])
        .base_path(dir.path())
        .groups("/")
        .entry_list(vec![1, 1, 3])
        .buffer_len(BufferLen::Rows(4))
        .build()?;
    let mut in_memory = ChunkIterator::builder(two_file_store()?)
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .entry_list(vec![1, 1, 3])
        .buffer_len(BufferLen::Rows(4))
        .build()?;

    assert_eq!(on_disk.len()?, in_memory.len()?);
    let idx = collect_u64(&mut on_disk, "idx")?;
    assert_eq!(idx, vec![1, 3]);
    assert_eq!(idx, collect_u64(&mut in_memory, "idx")?);
    Ok(())
}

#[test]
fn file_cache_bounds_open_files() -> Result<()> {
    let (dir, _) = temp_event_files(&[2, 3, 4], &["/"])?;
    let mut it = ChunkIterator::builder(ParquetStore::new())
        .files(["run*.parquet"])
        .base_path(dir.path())
        .groups("/")
        .file_cache(1)
        .buffer_len(BufferLen::Rows(2))
        .build()?;

    assert_eq!(collect_u64(&mut it, "idx")?, (0..9).collect::<Vec<_>>());
    assert!(it.store().open_files() <= 1);
    Ok(())
}

#[test]
fn parallel_map_over_files() -> Result<()> {
    let (dir, _) = temp_event_files(&[3, 4, 5, 6], &["/"])?;
    let mut it = ChunkIterator::builder(ParquetStore::new())
        .files(["run*.parquet"])
        .base_path(dir.path())
        .groups("/")
        .buffer_len(BufferLen::Rows(4))
        .build()?;

    let seq: Vec<u64> = it
        .try_map(|block, _| column_u64(block, "idx"), Workers::Sequential)?
        .into_iter()
        .flatten()
        .collect();
    let par: Vec<u64> = it
        .try_map(|block, _| column_u64(block, "idx"), Workers::Count(3))?
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(seq, (0..18).collect::<Vec<_>>());
    assert_eq!(par, seq);
    Ok(())
}

#[test]
fn config_from_json_file() -> Result<()> {
    let (dir, _) = temp_event_files(&[5, 7], &["ch1", "ch2"])?;
    let config = serde_json::json!({
        "files": "run*.parquet",
        "base_path": dir.path(),
        "groups": "ch2",
        "entry_mask": [[true, false, true], [false, true]],
        "field_mask": {"energy": true},
        "buffer_len": 2,
    });
    let path = dir.path().join("config.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&config)?)?;

    let mut it = IterConfig::from_json_file(&path)?.build(ParquetStore::new())?;
    assert_eq!(it.len()?, 3);
    assert_eq!(it.buffer_len(), 2);
    assert_eq!(it.buffer().field_names(), vec!["energy"]);

    let mut energy = Vec::new();
    while let Some(block) = it.next_block()? {
        energy.extend(column_f64(block, "energy")?);
    }
    assert_eq!(energy, vec![0.0, 20.0, 60.0]);
    Ok(())
}

#[test]
fn missing_group_is_an_error() -> Result<()> {
    let (dir, _) = temp_event_files(&[5], &["ch1"])?;
    let built = ChunkIterator::builder(ParquetStore::new())
        .files(["run*.parquet"])
        .base_path(dir.path())
        .groups("ch9")
        .build();
    assert!(built.is_err());
    Ok(())
}
