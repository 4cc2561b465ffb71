use anyhow::Result;
use chunkwise::testing::*;
use chunkwise::{BufferLen, ChunkIterator, EntryList, EntryMask, IterError, MemoryStore};

fn selected(
    store: MemoryStore,
    list: Option<EntryList>,
    mask: Option<EntryMask>,
) -> Result<ChunkIterator<MemoryStore>> {
    let mut b = ChunkIterator::builder(store)
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .buffer_len(BufferLen::Rows(4));
    if let Some(list) = list {
        b = b.entry_list(list);
    }
    if let Some(mask) = mask {
        b = b.entry_mask(mask);
    }
    b.build()
}

#[test]
fn global_entry_list() -> Result<()> {
    let mut it = selected(two_file_store()?, Some(vec![10, 1, 3].into()), None)?;
    assert_eq!(it.len()?, 3);
    assert_eq!(collect_u64(&mut it, "idx")?, vec![1, 3, 10]);

    // Entry 1 is the second selected row; the block crosses into f2.pq
    assert_column_eq(it.read(1, Some(2))?, "idx", &[3, 10]);
    assert_eq!(it.current_local_entries()?, vec![3, 5]);
    assert_eq!(it.current_global_entries()?, vec![3, 10]);

    assert_column_eq(it.read(2, None)?, "idx", &[10]);
    assert!(it.read(3, None)?.is_empty());

    assert_eq!(it.file_entry_list(0)?.as_deref(), Some(&[1u64, 3][..]));
    assert_eq!(it.file_entry_list(1)?.as_deref(), Some(&[5u64][..]));
    Ok(())
}

#[test]
fn per_file_list_converts_to_global() -> Result<()> {
    let mut it = selected(two_file_store()?, Some(vec![vec![3, 1], vec![5]].into()), None)?;
    assert_eq!(it.global_entry_list()?.as_deref(), Some(&[1u64, 3, 10][..]));
    assert_eq!(collect_u64(&mut it, "idx")?, vec![1, 3, 10]);

    let mut all = selected(two_file_store()?, None, None)?;
    assert!(all.global_entry_list()?.is_none());
    assert!(all.file_entry_list(1)?.is_none());
    Ok(())
}

#[test]
fn per_file_mask_skips_empty_files() -> Result<()> {
    let store = two_file_store()?;
    let probe = store.clone();
    let mask = vec![
        vec![false; 5],
        vec![true, false, true, false, true, false, true],
    ];
    let mut it = selected(store, None, Some(mask.into()))?;
    assert_eq!(it.len()?, 4);

    assert_column_eq(it.read(0, None)?, "idx", &[5, 7, 9, 11]);
    // Nothing is read from the file with no selected rows
    assert_eq!(probe.read_calls(), 1);
    assert_eq!(it.current_local_entries()?, vec![0, 2, 4, 6]);
    Ok(())
}

#[test]
fn global_mask() -> Result<()> {
    let mut mask = vec![false; 12];
    for i in [0, 4, 5, 11] {
        mask[i] = true;
    }
    let mut it = selected(two_file_store()?, None, Some(mask.into()))?;
    assert_eq!(it.len()?, 4);
    assert_eq!(block_sizes(&mut it)?, vec![4]);
    assert_eq!(collect_u64(&mut it, "idx")?, vec![0, 4, 5, 11]);
    assert_eq!(it.file_entry_list(1)?.as_deref(), Some(&[0u64, 6][..]));
    Ok(())
}

#[test]
fn out_of_range_entries_are_dropped() -> Result<()> {
    let mut it = selected(two_file_store()?, Some(vec![vec![1, 7, 9], vec![0]].into()), None)?;
    assert_eq!(it.len()?, 2);
    assert_eq!(collect_u64(&mut it, "idx")?, vec![1, 5]);
    assert_eq!(it.global_entry_list()?.as_deref(), Some(&[1u64, 5][..]));

    // Row 50 is past the last file and never reaches it
    let mut it = selected(two_file_store()?, Some(vec![2, 50].into()), None)?;
    assert_eq!(it.len()?, 1);
    assert_eq!(collect_u64(&mut it, "idx")?, vec![2]);
    assert_eq!(it.file_entry_list(0)?.as_deref(), Some(&[2u64][..]));
    assert_eq!(it.file_entry_list(1)?.as_deref(), Some(&[][..]));
    Ok(())
}

#[test]
fn repeated_entries_are_selected_once() -> Result<()> {
    let mut it = selected(two_file_store()?, Some(vec![1, 1, 3].into()), None)?;
    assert_eq!(it.len()?, 2);
    assert_eq!(collect_u64(&mut it, "idx")?, vec![1, 3]);
    assert_eq!(block_sizes(&mut it)?, vec![2]);
    assert_eq!(it.global_entry_list()?.as_deref(), Some(&[1u64, 3][..]));

    let mut it = selected(two_file_store()?, Some(vec![vec![4, 0, 4], vec![2, 2]].into()), None)?;
    assert_eq!(collect_u64(&mut it, "idx")?, vec![0, 4, 7]);
    Ok(())
}

#[test]
fn file_entry_list_out_of_range() -> Result<()> {
    for list in [None, Some(vec![1, 3].into())] {
        let mut it = selected(two_file_store()?, list, None)?;
        assert!(it.file_entry_list(1).is_ok());
        let err = it.file_entry_list(2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IterError>(),
            Some(IterError::InvalidArgument(_))
        ));
    }
    Ok(())
}

#[test]
fn empty_selection() -> Result<()> {
    let mut it = selected(two_file_store()?, Some(Vec::<u64>::new().into()), None)?;
    assert!(it.is_empty()?);
    assert!(it.next_block()?.is_none());
    Ok(())
}

#[test]
fn invalid_selections() -> Result<()> {
    let err = selected(
        two_file_store()?,
        Some(vec![1].into()),
        Some(vec![true].into()),
    )
    .err()
    .expect("list and mask together");
    assert!(matches!(err.downcast_ref::<IterError>(), Some(IterError::Config(_))));

    let err = selected(
        two_file_store()?,
        Some(vec![vec![0], vec![0], vec![0]].into()),
        None,
    )
    .err()
    .expect("more lists than files");
    assert!(matches!(err.downcast_ref::<IterError>(), Some(IterError::Config(_))));
    Ok(())
}
