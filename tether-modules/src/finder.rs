use tracing::trace;

use crate::error::{ModuleError, Result};
use crate::exports::Exports;
use crate::filter::{Filter, Visibility};
use crate::record::{ModuleId, ModuleRecord};
use crate::registry::ModuleRegistry;

/// A module a lookup matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Found {
    pub id: ModuleId,
    /// Absent when the module has not been initialized.
    pub exports: Option<Exports>,
}

impl Found {
    pub(crate) fn from_record(record: &ModuleRecord) -> Self {
        Self {
            id: record.id(),
            exports: record.exports().cloned(),
        }
    }
}

pub(crate) fn evaluate(filter: &Filter, record: &ModuleRecord) -> Result<bool> {
    filter.matches(record).map_err(|fault| ModuleError::Predicate {
        filter: filter.key().to_string(),
        fault,
    })
}

impl ModuleRegistry {
    /// First visible record the filter matches, scanning in ascending id
    /// order. A preferred filter scans the whole registry once per
    /// alternative before falling back to the next.
    pub fn find(&self, filter: &Filter, visibility: Visibility) -> Result<Option<Found>> {
        let records = self.snapshot();
        for candidate in filter.priorities() {
            for record in records.iter().filter(|r| visibility.admits(r.state())) {
                if evaluate(candidate, record)? {
                    trace!(filter = %filter.key(), module_id = %record.id(), "lookup matched");
                    return Ok(Some(Found::from_record(record)));
                }
            }
        }
        trace!(filter = %filter.key(), "lookup found nothing");
        Ok(None)
    }

    /// Every visible match in ascending id order.
    pub fn find_all(&self, filter: &Filter, visibility: Visibility) -> Result<Vec<Found>> {
        let mut found = Vec::new();
        for record in self.snapshot() {
            if visibility.admits(record.state()) && evaluate(filter, &record)? {
                found.push(Found::from_record(&record));
            }
        }
        Ok(found)
    }

    pub fn find_by_id(&self, id: ModuleId, visibility: Visibility) -> Option<Found> {
        self.get(id)
            .filter(|record| visibility.admits(record.state()))
            .map(|record| Found::from_record(&record))
    }
}
