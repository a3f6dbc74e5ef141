//! Row/header layout helpers shared by the store backends.

use sheetdesk_contracts::Record;

/// Names a row's cells by header position. Short rows are padded with empty
/// values; unnamed columns are dropped.
pub(crate) fn zip_row(header: &[String], row: &[String]) -> Record {
    header
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let value = row.get(idx).cloned().unwrap_or_default();
            (field.clone(), value)
        })
        .filter(|(field, _)| !field.is_empty())
        .collect()
}

/// Lays out named fields into header-column order. Fields that name no header
/// column are dropped; header columns without a field become empty cells.
pub(crate) fn layout_row(header: &[String], fields: &[(String, String)]) -> Vec<String> {
    header
        .iter()
        .map(|name| {
            fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        })
        .collect()
}

/// Overwrites only the named fields of an existing row, leaving the rest
/// untouched. The row is padded out to header width first.
pub(crate) fn merge_row(header: &[String], existing: &[String], fields: &[(String, String)]) -> Vec<String> {
    let mut merged = existing.to_vec();
    merged.resize(header.len(), String::new());
    for (field, value) in fields {
        if let Some(column) = header.iter().position(|name| name == field) {
            merged[column] = value.clone();
        }
    }
    merged
}
