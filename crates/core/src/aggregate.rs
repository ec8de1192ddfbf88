use crate::models::{AggregateTable, ImageId, ProviderResult, TableRow};
use providers::ProviderKind;
use tracing::debug;

/// Left-joins provider results onto the resolved image list.
///
/// Rows are exactly `images`, in order. Columns follow `columns`, with any
/// provider that has a result but no configured column appended at the end.
/// A provider without a result gets a column of `None`, and empty records
/// are stored as `None` too.
pub fn aggregate<'a, I>(images: &[ImageId], columns: &[ProviderKind], results: I) -> AggregateTable
where
    I: IntoIterator<Item = (ProviderKind, &'a ProviderResult)>,
{
    let results: Vec<(ProviderKind, &ProviderResult)> = results.into_iter().collect();

    let mut cols: Vec<ProviderKind> = Vec::new();
    for kind in columns.iter().copied().chain(results.iter().map(|(k, _)| *k)) {
        if !cols.contains(&kind) {
            cols.push(kind);
        }
    }

    let by_column: Vec<Option<&ProviderResult>> = cols
        .iter()
        .map(|kind| results.iter().find(|(k, _)| k == kind).map(|(_, r)| *r))
        .collect();

    for (kind, result) in &results {
        let extra = result.iter().filter(|(id, _)| !images.contains(*id)).count();
        if extra > 0 {
            debug!(provider = %kind, extra, "ignoring records for images outside the run");
        }
    }

    let rows = images
        .iter()
        .map(|image| TableRow {
            image: image.clone(),
            cells: by_column
                .iter()
                .map(|result| {
                    result
                        .and_then(|r| r.get(image))
                        .filter(|record| !record.is_empty())
                        .cloned()
                })
                .collect(),
        })
        .collect();

    AggregateTable {
        columns: cols,
        rows,
    }
}
