use anyhow::Result;
use chunkwise::testing::*;
use chunkwise::{BufferLen, ChunkIterator, FieldMask, IterError, MemoryStore};

fn events(store: &MemoryStore, buffer_len: usize) -> Result<ChunkIterator<MemoryStore>> {
    ChunkIterator::builder(store.clone())
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .buffer_len(BufferLen::Rows(buffer_len))
        .build()
}

fn aux(store: &MemoryStore, files: [&str; 2], buffer_len: usize) -> Result<ChunkIterator<MemoryStore>> {
    ChunkIterator::builder(store.clone())
        .files(files)
        .groups("aux")
        .buffer_len(BufferLen::Rows(buffer_len))
        .build()
}

#[test]
fn friends_read_in_lockstep() -> Result<()> {
    let store = two_file_store_with_friend()?;
    let mut it = ChunkIterator::builder(store.clone())
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .buffer_len(BufferLen::Rows(4))
        .friend(aux(&store, ["g1.pq", "g2.pq"], 3)?)
        .build()?;

    // The smaller capacity wins
    assert_eq!(it.buffer_len(), 3);
    assert_eq!(it.friends()[0].buffer_len(), 3);

    let block = it.read(4, None)?;
    assert_eq!(
        block.field_names(),
        vec!["idx", "energy", "channel", "tag", "weight"]
    );
    assert_eq!(column_u64(block, "idx")?, vec![4, 5, 6]);
    assert_eq!(column_u64(block, "tag")?, vec![4, 5, 6]);
    assert_eq!(column_f64(block, "weight")?, vec![2.0, 2.5, 3.0]);

    let mine = it.current_global_entries()?;
    let theirs = it.friends_mut()[0].current_global_entries()?;
    assert_eq!(mine, theirs);

    assert_eq!(block_sizes(&mut it)?, vec![3, 3, 3, 3]);
    assert_eq!(collect_u64(&mut it, "tag")?, collect_u64(&mut it, "idx")?);
    Ok(())
}

#[test]
fn adding_a_friend_reads_it_at_the_cursor() -> Result<()> {
    let store = two_file_store_with_friend()?;
    let mut it = events(&store, 4)?;
    it.read(2, None)?;
    it.add_friend(aux(&store, ["g1.pq", "g2.pq"], 4)?)?;

    assert_column_eq(it.buffer(), "tag", &[2, 3, 4, 5]);
    assert_column_eq(it.buffer(), "idx", &[2, 3, 4, 5]);
    Ok(())
}

#[test]
fn short_friend_is_an_error() -> Result<()> {
    let store = two_file_store()?
        .with("g1.pq", "aux", aux_table(0, 5)?)
        .with("g2.pq", "aux", aux_table(5, 3)?);
    let mut it = events(&store, 4)?;
    it.add_friend(aux(&store, ["g1.pq", "g2.pq"], 4)?)?;

    assert_column_eq(it.read(4, None)?, "tag", &[4, 5, 6, 7]);
    let err = it.read(6, None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IterError>(),
        Some(IterError::FriendMismatch(_))
    ));
    Ok(())
}

#[test]
fn friends_of_friends_are_flattened() -> Result<()> {
    let store = two_file_store_with_friend()?
        .with("h1.pq", "aux", aux_table(100, 5)?)
        .with("h2.pq", "aux", aux_table(105, 7)?);
    let mut inner = aux(&store, ["h1.pq", "h2.pq"], 4)?;
    inner.reset_field_mask(FieldMask::include(["weight"]))?;
    let mut middle = aux(&store, ["g1.pq", "g2.pq"], 4)?;
    middle.add_friend(inner)?;

    let mut it = events(&store, 4)?;
    it.add_friend(middle)?;
    assert_eq!(it.friends().len(), 2);
    assert!(it.friends().iter().all(|f| f.friends().is_empty()));
    assert_eq!(it.friends()[1].files()[0].to_string_lossy(), "h1.pq");

    // Later friends win on shared column names
    let block = it.read(0, Some(2))?;
    assert_eq!(column_u64(block, "tag")?, vec![0, 1]);
    assert_eq!(column_f64(block, "weight")?, vec![50.0, 50.5]);
    Ok(())
}

#[test]
fn field_mask_reaches_friends() -> Result<()> {
    let store = two_file_store_with_friend()?;
    let mut it = events(&store, 4)?;
    it.add_friend(aux(&store, ["g1.pq", "g2.pq"], 4)?)?;
    it.read(0, None)?;

    it.reset_field_mask(FieldMask::include(["idx", "tag"]))?;
    assert!(it.buffer().is_empty());
    assert_eq!(it.friends()[0].field_mask(), &FieldMask::include(["idx", "tag"]));

    let block = it.read(8, None)?;
    assert_eq!(block.field_names(), vec!["idx", "tag"]);
    assert_eq!(column_u64(block, "tag")?, vec![8, 9, 10, 11]);
    Ok(())
}
