use crate::api::types::{Record, Timestamp};

/// Wrap a value in double quotes, doubling any quotes inside it.
pub fn quote_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// One CSV line per item, fields in `columns` order. Unknown or missing
/// columns export as an empty quoted field.
pub fn rows<T: Record>(items: &[T], columns: &[&str]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            columns
                .iter()
                .map(|col| quote_field(&item.column(col).unwrap_or_default()))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect()
}

pub fn header(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_field(c))
        .collect::<Vec<_>>()
        .join(",")
}

/// Header line followed by the item rows.
pub fn document<T: Record>(items: &[T], columns: &[&str]) -> String {
    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(header(columns));
    lines.extend(rows(items, columns));
    lines.join("\n")
}

pub fn filename(resource: &str, at: Timestamp) -> String {
    format!("{}_{}.csv", resource, at.as_millis())
}
