//! Searching several indexes at once (several stores or data kinds).

use crate::error::IndexResult;
use crate::filter::Filter;
use crate::record::MetadataRecord;
use crate::traits::MetadataIndex;

/// A hit from a multi-index search, tagged with the index position it came
/// from.
#[derive(Clone, Debug, PartialEq)]
pub struct Hit {
    pub source: usize,
    pub record: MetadataRecord,
}

/// Records matching every filter, across `indexes`, in index order.
pub fn lookup_many(indexes: &[&dyn MetadataIndex], filters: &[Filter]) -> IndexResult<Vec<Hit>> {
    let mut hits = Vec::new();
    for (source, index) in indexes.iter().enumerate() {
        hits.extend(
            index
                .search(filters)?
                .into_iter()
                .map(|record| Hit { source, record }),
        );
    }
    Ok(hits)
}

/// Records matching none of the filters, across `indexes`.
pub fn negate_many(indexes: &[&dyn MetadataIndex], filters: &[Filter]) -> IndexResult<Vec<Hit>> {
    let mut hits = Vec::new();
    for (source, index) in indexes.iter().enumerate() {
        let ids = index.negate(filters)?;
        hits.extend(
            index
                .all()?
                .into_iter()
                .filter(|r| ids.contains(&r.series_id))
                .map(|record| Hit { source, record }),
        );
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;
    use crate::record::tests::sample;
    use crate::staging::Transaction;

    #[test]
    fn hits_are_tagged_by_source() {
        let a = InMemoryIndex::new("surface").unwrap();
        let b = InMemoryIndex::new("surface").unwrap();
        let mut txn = Transaction::new();
        txn.put(sample("mhd", "ch4"));
        a.commit(&txn).unwrap();
        let mut txn = Transaction::new();
        txn.put(sample("tac", "ch4")).put(sample("tac", "co2"));
        b.commit(&txn).unwrap();

        let indexes: [&dyn MetadataIndex; 2] = [&a, &b];
        let hits = lookup_many(&indexes, &[Filter::eq("species", "ch4")]).unwrap();
        assert_eq!(hits.iter().map(|h| h.source).collect::<Vec<_>>(), vec![0, 1]);

        let others = negate_many(&indexes, &[Filter::eq("species", "ch4")]).unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].source, 1);
    }
}
