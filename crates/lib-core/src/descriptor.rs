/// Parser for data-grid descriptor sources.
///
/// Descriptors are a property-list format, not scripts: a `release N;`
/// header followed by nested `key=value` groups. Only three things matter
/// to the analysis: the `retrieve="..."` select SQL, the `update="..."`
/// base table, and the `dbname="table.column"` hints on column entries.
/// Everything else is presentation detail and is skipped.

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnHint {
    pub column: String,
    pub source_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDataWindow {
    pub object_name: String,
    pub dw_name: String,
    pub base_table: Option<String>,
    pub sql_select: Option<String>,
    pub column_hints: Vec<ColumnHint>,
}

/// A descriptor is recognized by its extension upstream, or by a leading
/// `release N;` / `datawindow(` marker when the extension is ambiguous.
pub fn is_descriptor(text: &str) -> bool {
    let head = text.trim_start();
    let head = head
        .strip_prefix('$')
        .and_then(|_| head.split_once('\n').map(|(_, rest)| rest.trim_start()))
        .unwrap_or(head);
    let lowered = head.get(..32).unwrap_or(head).to_ascii_lowercase();
    lowered.starts_with("release") || lowered.starts_with("datawindow(")
}

/// Extract the analysis-relevant parts of a descriptor. The grid is named
/// by the file stem; a descriptor with neither `retrieve=` nor `update=`
/// still yields the object itself.
pub fn parse_descriptor(text: &str, stem: &str) -> ParsedDataWindow {
    let lowered = text.to_ascii_lowercase();
    let name = stem.to_lowercase();

    let sql_select = quoted_value(text, &lowered, "retrieve=");
    let base_table = quoted_value(text, &lowered, "update=")
        .map(|t| bare_lowercase(&t))
        .filter(|t| !t.is_empty());

    let mut column_hints = Vec::new();
    let mut from = 0;
    while let Some(found) = lowered[from..].find("dbname=\"") {
        let value_start = from + found + "dbname=\"".len();
        let value = read_quoted(&text[value_start..]);
        from = value_start + value.len().max(1);
        let value = value.to_lowercase();
        match value.rsplit_once('.') {
            Some((table, column)) => column_hints.push(ColumnHint {
                column: column.to_owned(),
                source_table: Some(table.rsplit('.').next().unwrap_or(table).to_owned()),
            }),
            None => column_hints.push(ColumnHint {
                column: value,
                source_table: None,
            }),
        }
    }

    ParsedDataWindow {
        object_name: name.clone(),
        dw_name: name,
        base_table,
        sql_select,
        column_hints,
    }
}

/// Find `key="..."` in the descriptor and return the unescaped value.
/// The key match is case-insensitive; the value keeps its case.
fn quoted_value(text: &str, lowered: &str, key: &str) -> Option<String> {
    let mut from = 0;
    while let Some(found) = lowered[from..].find(key) {
        let after_key = from + found + key.len();
        let rest = &text[after_key..];
        if let Some(stripped) = rest.strip_prefix('"') {
            let value = read_quoted(stripped);
            if !value.is_empty() {
                return Some(value);
            }
        }
        from = after_key;
    }
    None
}

/// Read up to the closing quote, collapsing doubled quotes. The opening
/// quote has already been stripped.
fn read_quoted(text: &str) -> String {
    let mut out = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
            } else {
                break;
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn bare_lowercase(name: &str) -> String {
    name.rsplit('.')
        .next()
        .unwrap_or(name)
        .trim()
        .to_lowercase()
}
