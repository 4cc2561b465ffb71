use anyhow::{Result, anyhow};
use arrow::array::{Array, AsArray};
use arrow::datatypes::Float64Type;
use chunkwise::testing::*;
use chunkwise::{
    Block, BufferLen, ChunkIterator, Filter, IterError, MemoryStore, RowFilter, Table, Workers,
};
use std::sync::Arc;

fn two_files() -> Result<ChunkIterator<MemoryStore>> {
    ChunkIterator::builder(two_file_store()?)
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .buffer_len(BufferLen::Rows(4))
        .build()
}

fn table(block: Block) -> Result<Table> {
    block.into_table().ok_or_else(|| anyhow!("expected a table block"))
}

#[test]
fn query_everything() -> Result<()> {
    let mut it = two_files()?;
    let out = table(it.query(Filter::<MemoryStore>::All, Workers::Sequential)?)?;
    assert_eq!(out.len(), 12);
    assert_eq!(column_u64(&out, "idx")?, (0..12).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn query_with_expression() -> Result<()> {
    let mut it = two_files()?;
    for workers in [Workers::Sequential, Workers::Count(2)] {
        let out = table(it.query("energy >= 30 and channel == 1", workers)?)?;
        assert_eq!(column_u64(&out, "idx")?, vec![5, 9]);
    }

    let filter = RowFilter::parse("not (channel < 2) & idx != 3")?;
    let out = table(it.query(filter, Workers::Sequential)?)?;
    assert_eq!(column_u64(&out, "idx")?, vec![2, 6, 7, 10, 11]);
    Ok(())
}

#[test]
fn query_with_function() -> Result<()> {
    let mut it = two_files()?;

    let energy = Filter::<MemoryStore>::func(|block, _| {
        let col = block.column("energy").ok_or_else(|| anyhow!("no energy"))?;
        Ok(Block::Array(Arc::clone(col)))
    });
    let out = it
        .query(energy, Workers::Count(2))?
        .into_array()
        .ok_or_else(|| anyhow!("expected an array"))?;
    assert_eq!(out.len(), 12);
    assert_eq!(out.as_primitive::<Float64Type>().value(11), 110.0);

    let pair = Filter::<MemoryStore>::func(|block, _| {
        let idx = block.column("idx").ok_or_else(|| anyhow!("no idx"))?;
        let channel = block.column("channel").ok_or_else(|| anyhow!("no channel"))?;
        Ok(Block::Columns(vec![Arc::clone(idx), Arc::clone(channel)]))
    });
    let cols = it
        .query(pair, Workers::Sequential)?
        .into_columns()
        .ok_or_else(|| anyhow!("expected columns"))?;
    assert_eq!(cols.len(), 2);
    assert!(cols.iter().all(|c| c.len() == 12));
    Ok(())
}

#[test]
fn mixed_block_kinds_are_rejected() -> Result<()> {
    let mut it = two_files()?;
    let mixed = Filter::<MemoryStore>::func(|block, it| {
        let idx = block.column("idx").ok_or_else(|| anyhow!("no idx"))?;
        Ok(if it.current_i_entry() == 0 {
            Block::Array(Arc::clone(idx))
        } else {
            Block::Columns(vec![Arc::clone(idx)])
        })
    });
    let err = it.query(mixed, Workers::Sequential).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IterError>(),
        Some(IterError::TypeMismatch(_))
    ));
    Ok(())
}

#[test]
fn empty_results_keep_the_columns() -> Result<()> {
    let mut it = two_files()?;
    let out = table(it.query("energy > 1000", Workers::Sequential)?)?;
    assert!(out.is_empty());
    assert_eq!(out.field_names(), vec!["idx", "energy", "channel"]);

    let mut none = ChunkIterator::builder(two_file_store()?)
        .files(["f1.pq", "f2.pq"])
        .groups("evt")
        .entry_list(Vec::<u64>::new())
        .build()?;
    let out = table(none.query(Filter::<MemoryStore>::All, Workers::Count(2))?)?;
    assert!(out.is_empty());
    assert_eq!(out.field_names(), vec!["idx", "energy", "channel"]);
    Ok(())
}

#[test]
fn malformed_expressions() -> Result<()> {
    let mut it = two_files()?;
    for bad in ["energy >", "energy > 3 and", "(channel == 1", "3 < 4", "energy @ 2"] {
        let err = it.query(bad, Workers::Sequential).unwrap_err();
        assert!(
            matches!(err.downcast_ref::<IterError>(), Some(IterError::InvalidArgument(_))),
            "{bad}: {err:#}"
        );
    }
    let err = it.query("missing == 1", Workers::Sequential).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IterError>(),
        Some(IterError::InvalidArgument(_))
    ));
    Ok(())
}
