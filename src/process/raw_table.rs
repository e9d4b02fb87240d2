use std::collections::HashMap;

/// An untyped table, exactly as the source CSV delivered it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column names from the header row (after normalization).
    pub headers: Vec<String>,
    /// Each data row, one cell per header. Empty cells are `None`.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Iterate over one column's cells. Yields nothing if the column is absent.
    pub fn column<'a>(&'a self, name: &str) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let idx = self.column_index(name);
        self.rows.iter().filter_map(move |row| {
            idx.map(|i| row.get(i).and_then(|cell| cell.as_deref()))
        })
    }

    /// Names from `required` that are not in the header, in the order given.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Map of the columns in `names` to their positions. Absent names are left out.
    pub fn index_of(&self, names: &[&str]) -> HashMap<String, usize> {
        names
            .iter()
            .filter_map(|n| self.column_index(n).map(|i| (n.to_string(), i)))
            .collect()
    }
}

/// Bring older OWID exports in line with the current schema:
/// `country` becomes `location` and `code` becomes `iso_code`,
/// unless the target name already exists.
pub fn normalize_columns(mut table: RawTable) -> RawTable {
    let renames = [("country", "location"), ("code", "iso_code")];
    for (from, to) in renames {
        if table.has_column(to) {
            continue;
        }
        if let Some(i) = table.column_index(from) {
            table.headers[i] = to.to_string();
        }
    }
    table
}
