pub mod store;

pub use store::{JsonRecordStore, RecordSource};
