use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Sanitizes a warehouse identifier for safe backtick quoting.
///
/// Rejects empty identifiers and identifiers containing control characters. Backticks and
/// backslashes are escaped with a backslash, following GoogleSQL lexical rules.
pub fn sanitize_identifier(identifier: &str, context: &str) -> SyncResult<String> {
    if identifier.is_empty() {
        bail!(
            ErrorKind::WarehouseTableNameInvalid,
            "Invalid warehouse identifier",
            format!("{context} cannot be empty")
        );
    }

    if identifier.chars().any(char::is_control) {
        bail!(
            ErrorKind::WarehouseTableNameInvalid,
            "Invalid warehouse identifier",
            format!("{context} contains control characters")
        );
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

/// Quotes a column name, e.g. `` `price` ``.
pub fn quote_identifier(identifier: &str) -> SyncResult<String> {
    let identifier = sanitize_identifier(identifier, "column name")?;

    Ok(format!("`{identifier}`"))
}

/// Quotes a dataset qualified table name, e.g. `` `websync.products` ``.
pub fn quote_table(dataset: &str, table: &str) -> SyncResult<String> {
    let dataset = sanitize_identifier(dataset, "dataset id")?;
    let table = sanitize_identifier(table, "table id")?;

    Ok(format!("`{dataset}.{table}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_backticks_and_backslashes() {
        assert_eq!(
            sanitize_identifier("we`ird\\name", "column name").unwrap(),
            "we\\`ird\\\\name"
        );
        assert_eq!(quote_identifier("price").unwrap(), "`price`");
        assert_eq!(
            quote_table("websync", "products").unwrap(),
            "`websync.products`"
        );
    }

    #[test]
    fn rejects_empty_and_control_characters() {
        let empty = sanitize_identifier("", "table id").unwrap_err();
        let control = sanitize_identifier("a\nb", "table id").unwrap_err();

        assert_eq!(empty.kind(), ErrorKind::WarehouseTableNameInvalid);
        assert_eq!(empty.detail(), Some("table id cannot be empty"));
        assert_eq!(control.kind(), ErrorKind::WarehouseTableNameInvalid);
    }
}
