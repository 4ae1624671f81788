pub mod ingestion;
pub mod tables;
