use std::path::PathBuf;
use tracing::debug;

use crate::error::PipelineResult;
use crate::ml::persistence::read_json;
use crate::types::{RawRecord, Route};

/// Supplier of raw price snapshots, one list per route
pub trait RecordSource {
    fn records(&self, route: Route) -> PipelineResult<Vec<RawRecord>>;
}

/// Reads `<root>/<dataset>/<ROUTE>.json`, each an array of records
pub struct JsonRecordStore {
    root: PathBuf,
    dataset: String,
}

impl JsonRecordStore {
    pub fn new(root: impl Into<PathBuf>, dataset: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            dataset: dataset.into(),
        }
    }

    pub fn route_path(&self, route: Route) -> PathBuf {
        self.root.join(&self.dataset).join(format!("{}.json", route.as_str()))
    }
}

impl RecordSource for JsonRecordStore {
    fn records(&self, route: Route) -> PipelineResult<Vec<RawRecord>> {
        let path = self.route_path(route);
        let records: Vec<RawRecord> = read_json(&path)?;
        debug!("Read {} records for {} from {}", records.len(), route, path.display());
        Ok(records)
    }
}

/// In-memory source, mostly for tests and tooling
impl RecordSource for std::collections::HashMap<Route, Vec<RawRecord>> {
    fn records(&self, route: Route) -> PipelineResult<Vec<RawRecord>> {
        Ok(self.get(&route).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn test_reads_route_file() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("large_data_set");
        std::fs::create_dir_all(&dataset_dir).unwrap();
        std::fs::write(
            dataset_dir.join("CRL_OTP.json"),
            r#"[{"Date": "20160105", "State": 9, "MinimumPrice": "€ 25,99"},
                {"Date": "20160105", "State": 8, "MinimumPrice": "€ 19,99"}]"#,
        )
        .unwrap();

        let store = JsonRecordStore::new(dir.path(), "large_data_set");
        let records = store.records(Route::CrlOtp).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state, 8);
        assert_eq!(records[0].minimum_price, "€ 25,99");
    }

    #[test]
    fn test_missing_route_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path(), "large_data_set");
        assert!(matches!(store.records(Route::BcnBud), Err(PipelineError::Io { .. })));
    }
}
