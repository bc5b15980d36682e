//! Folds task outcomes into the run's summary rows.

use crate::artifact::SummaryRow;

/// Summary rows in task-completion order.
///
/// Concurrency reorders results within a batch, so consumers that need a
/// stable order should call [`SummaryAggregator::sorted_by_start_time`].
#[derive(Debug, Clone, Default)]
pub struct SummaryAggregator {
    rows: Vec<SummaryRow>,
}

impl SummaryAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row from a settled task.
    pub fn push(&mut self, row: SummaryRow) {
        self.rows.push(row);
    }

    /// Replaces the row with the same file name, or appends it.
    pub fn upsert(&mut self, row: SummaryRow) {
        match self
            .rows
            .iter_mut()
            .find(|existing| existing.file_name == row.file_name)
        {
            Some(existing) => *existing = row,
            None => self.rows.push(row),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    /// Consumes the aggregator, returning rows in completion order.
    #[must_use]
    pub fn into_rows(self) -> Vec<SummaryRow> {
        self.rows
    }

    /// Rows ordered by start time, then file name. Rows without a start time sort last.
    #[must_use]
    pub fn sorted_by_start_time(rows: &[SummaryRow]) -> Vec<SummaryRow> {
        let mut sorted = rows.to_vec();
        sorted.sort_by(|a, b| {
            match (a.start_time, b.start_time) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| a.file_name.cmp(&b.file_name))
        });
        sorted
    }
}
