//! Struct Scanner / Map Merger.
//!
//! Rows are matched to fields through the model descriptor: a column matches
//! the field whose storage column has the same name (case-insensitive), or
//! failing that the field whose Rust name or data-tag alias matches. Columns
//! nothing matches are discarded. Joined relation columns arrive prefixed
//! with their alias chain (`author__name`) and are assembled bottom-up.

use crate::plan::JoinNode;
use indexmap::{IndexMap, IndexSet};
use linkorm_core::{
    AssignMode, CHAIN_SEPARATOR, ConfigErrorKind, Error, FieldDescriptor, KeyValue, Model,
    ModelDescriptor, ModelType, QueryError, QueryErrorKind, Record, Result, Row, TypeError,
    Value, downcast_record, read_path, recover, resolve_type, write_path,
};

/// Column carrying the owner key in batched relation statements.
pub const PARENT_KEY_COLUMN: &str = "__parent_key";

/// An ordered column-name to value map, one per row.
pub type MapRow = IndexMap<String, Value>;

/// Where `Select::scan` puts its results.
pub enum ScanDest<'a, M: Model> {
    /// Fill an existing struct from the first row; no row is a not-found error.
    One(&'a mut M),
    /// Append every row.
    Many(&'a mut Vec<M>),
    /// Append every row, boxed.
    Boxed(&'a mut Vec<Box<M>>),
    /// Append every row as an ordered map; relations are not loaded.
    Maps(&'a mut Vec<MapRow>),
}

impl<M: Model> ScanDest<'_, M> {
    #[allow(clippy::result_large_err)]
    pub(crate) fn fill_records(self, records: Vec<Box<dyn Record>>) -> Result<()> {
        match self {
            ScanDest::One(dest) => {
                let first = records.into_iter().next().ok_or_else(not_found)?;
                *dest = downcast::<M>(first)?;
            }
            ScanDest::Many(dest) => {
                dest.reserve(records.len());
                for record in records {
                    dest.push(downcast::<M>(record)?);
                }
            }
            ScanDest::Boxed(dest) => {
                dest.reserve(records.len());
                for record in records {
                    dest.push(Box::new(downcast::<M>(record)?));
                }
            }
            ScanDest::Maps(dest) => {
                for record in records {
                    dest.push(record_to_map(record.as_ref())?);
                }
            }
        }
        Ok(())
    }
}

fn not_found() -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::NotFound,
        sql: None,
        message: "no rows in result set".to_string(),
        operation: Some("scan"),
        source: None,
    })
}

#[allow(clippy::result_large_err)]
pub(crate) fn downcast<M: Model>(record: Box<dyn Record>) -> Result<M> {
    let actual = record.model_type().type_name;
    downcast_record::<M>(record).ok_or_else(|| {
        Error::Type(TypeError {
            expected: std::any::type_name::<M>(),
            actual: actual.to_string(),
            column: None,
            rust_type: None,
        })
    })
}

/// Field a result column scans into.
pub fn match_column<'d>(descriptor: &'d ModelDescriptor, column: &str) -> Option<&'d FieldDescriptor> {
    descriptor
        .field_by_column(column)
        .or_else(|| descriptor.field_by_name(column))
}

/// Scan one row into a fresh record of `model`.
#[allow(clippy::result_large_err)]
pub fn scan_record(model: ModelType, row: &Row) -> Result<Box<dyn Record>> {
    let descriptor = resolve_type(model)?;
    let mut record = model.new_record();
    fill(record.as_mut(), &descriptor, row, &[])?;
    Ok(record)
}

/// Scan one row into an existing record, leaving unmatched fields alone.
///
/// Returns the number of columns that matched a field.
#[allow(clippy::result_large_err)]
pub fn scan_into(record: &mut dyn Record, row: &Row) -> Result<usize> {
    let descriptor = resolve_type(record.model_type())?;
    recover("scan", || fill(record, &descriptor, row, &[]))
}

#[allow(clippy::result_large_err)]
fn fill(
    record: &mut dyn Record,
    descriptor: &ModelDescriptor,
    row: &Row,
    joined: &[JoinNode],
) -> Result<usize> {
    let mut matched = 0;
    for (column, value) in row.iter() {
        if column.eq_ignore_ascii_case(PARENT_KEY_COLUMN) || is_joined(column, joined) {
            continue;
        }
        match match_column(descriptor, column) {
            Some(field) => {
                write_path(record, &field.path, value.clone()).map_err(|e| with_column(e, column))?;
                matched += 1;
            }
            None => {
                tracing::trace!(
                    model = descriptor.model.type_name,
                    column,
                    "Discarding unmatched column"
                );
            }
        }
    }
    Ok(matched)
}

fn is_joined(column: &str, joined: &[JoinNode]) -> bool {
    joined.iter().any(|node| {
        let marker = format!("{}{}", node.segment, CHAIN_SEPARATOR);
        column.len() > marker.len()
            && column.is_char_boundary(marker.len())
            && column[..marker.len()].eq_ignore_ascii_case(&marker)
    })
}

fn with_column(err: Error, column: &str) -> Error {
    match err {
        Error::Type(mut te) => {
            te.column = Some(column.to_string());
            Error::Type(te)
        }
        other => other,
    }
}

/// Primary key of a record, normalized; `None` if any key part is unset.
pub(crate) fn primary_key(record: &dyn Record, descriptor: &ModelDescriptor) -> Option<Vec<KeyValue>> {
    let key: Option<Vec<KeyValue>> = descriptor
        .primary_keys()
        .map(|f| read_path(record, &f.path).and_then(|v| v.to_key()))
        .collect();
    key.filter(|k| !k.is_empty())
}

/// Build records of `model` from rows that may carry joined relation columns.
///
/// Rows are grouped by primary key when any join below fans out (a collection
/// joined into the statement repeats the owner row); otherwise every row is a
/// record. For each record and join, the prefixed columns of its rows build
/// the related records; an all-NULL prefix marks the relation loaded-empty.
#[allow(clippy::result_large_err)]
pub(crate) fn assemble(
    model: ModelType,
    rows: &[Row],
    joins: &[JoinNode],
    dedupe: bool,
) -> Result<Vec<Box<dyn Record>>> {
    let descriptor = resolve_type(model)?;
    let group_by_key = dedupe || joins.iter().any(JoinNode::fans_out);

    let mut records: Vec<Box<dyn Record>> = Vec::new();
    let mut groups: Vec<Vec<&Row>> = Vec::new();
    let mut index: IndexMap<Vec<KeyValue>, usize> = IndexMap::new();

    for row in rows {
        let mut record = model.new_record();
        fill(record.as_mut(), &descriptor, row, joins)?;
        let key = if group_by_key {
            primary_key(record.as_ref(), &descriptor)
        } else {
            None
        };
        match key {
            Some(key) => {
                if let Some(&i) = index.get(&key) {
                    groups[i].push(row);
                } else {
                    index.insert(key, records.len());
                    records.push(record);
                    groups.push(vec![row]);
                }
            }
            None => {
                records.push(record);
                groups.push(vec![row]);
            }
        }
    }

    for (record, group) in records.iter_mut().zip(&groups) {
        for node in joins {
            let sub_rows: Vec<Row> = group
                .iter()
                .map(|row| row.subset_by_prefix(&node.segment))
                .filter(|sub| sub.values().any(|v| !v.is_null()))
                .collect();
            let children = assemble(node.target, &sub_rows, &node.children, true)?;
            let mode = if node.collection {
                AssignMode::Replace
            } else {
                AssignMode::IfEmpty
            };
            let slot = record.relation_mut(node.field).ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownRelation,
                    format!("{} has no relation '{}'", model.type_name, node.field),
                )
            })?;
            slot.assign(children, mode)?;
        }
    }

    Ok(records)
}

/// Convert one row into an ordered map, keeping column order.
pub fn row_to_map(row: &Row) -> MapRow {
    row.iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Convert rows into ordered maps.
pub fn scan_maps(rows: &[Row]) -> Vec<MapRow> {
    rows.iter().map(row_to_map).collect()
}

/// Column values of a record as an ordered map keyed by storage column.
#[allow(clippy::result_large_err)]
pub fn record_to_map(record: &dyn Record) -> Result<MapRow> {
    let descriptor = resolve_type(record.model_type())?;
    Ok(descriptor
        .fields
        .iter()
        .filter_map(|f| read_path(record, &f.path).map(|v| (f.column.clone(), v)))
        .collect())
}

/// Merge a partial set of values into an existing record.
///
/// Keys match a field's storage column, Rust name or data-tag alias,
/// case-insensitively. Matched fields are converted best-effort to the
/// field's type; unmatched keys and unlisted fields are left untouched.
/// Returns the number of fields written.
#[allow(clippy::result_large_err)]
pub fn merge_map<K, I>(values: I, dest: &mut dyn Record) -> Result<usize>
where
    K: AsRef<str>,
    I: IntoIterator<Item = (K, Value)>,
{
    let descriptor = resolve_type(dest.model_type())?;
    recover("merge_map", move || {
        let mut written = 0;
        let mut seen: IndexSet<String> = IndexSet::new();
        for (key, value) in values {
            let key = key.as_ref();
            let Some(field) = match_column(&descriptor, key) else {
                tracing::trace!(
                    model = descriptor.model.type_name,
                    key,
                    "Skipping key with no matching field"
                );
                continue;
            };
            if !seen.insert(field.column.clone()) {
                tracing::debug!(key, column = %field.column, "Key maps to a field already merged");
            }
            write_path(dest, &field.path, value).map_err(|e| with_column(e, key))?;
            written += 1;
        }
        Ok(written)
    })
}
