//! Flattening of the full assignment set for serialization.
//!
//! Read-only path: enumerate the store, normalize into rows ordered by
//! privilege then principal (ordinal, case-sensitive), and write them as
//! CSV or indented JSON into any byte sink.

use std::io::Write;

use serde::Serialize;
use thiserror::Error;

use crate::store::{PolicyStore, StoreError};
use crate::types::{Principal, Privilege};

/// One row of listing output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ListingRow {
    /// The right
    pub privilege: Privilege,
    /// The identity holding it
    pub principal: Principal,
}

/// Errors on the listing path. Fatal for list mode only.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The snapshot could not be read
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The output sink rejected a write
    #[error("unable to write listing output: {0}")]
    Io(#[from] std::io::Error),
    /// The rows could not be serialized as JSON
    #[error("unable to serialize listing output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Snapshot the store and flatten it into deterministically ordered rows.
pub async fn project(store: &(dyn PolicyStore + Send)) -> Result<Vec<ListingRow>, ListingError> {
    let mut rows: Vec<ListingRow> = store
        .enumerate_all()
        .await?
        .into_iter()
        .map(|assignment| ListingRow {
            privilege: assignment.privilege,
            principal: assignment.principal,
        })
        .collect();
    rows.sort();
    Ok(rows)
}

/// Write rows as CSV with every field quoted.
pub fn write_csv(rows: &[ListingRow], sink: &mut dyn Write) -> Result<(), ListingError> {
    writeln!(sink, "{},{}", csv_quote("Privilege"), csv_quote("Principal"))?;
    for row in rows {
        writeln!(
            sink,
            "{},{}",
            csv_quote(&row.privilege.0),
            csv_quote(&row.principal.0)
        )?;
    }
    Ok(())
}

/// Write rows as indented JSON.
pub fn write_json(rows: &[ListingRow], sink: &mut dyn Write) -> Result<(), ListingError> {
    serde_json::to_writer_pretty(&mut *sink, rows)?;
    writeln!(sink)?;
    Ok(())
}

/// Quote one CSV field, doubling embedded quotes.
fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
