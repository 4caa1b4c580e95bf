use ahash::AHashSet;

use crate::ir::{RwType, SqlKind};

/// Normalize a SQL statement for storage and comparison.
///
/// Line (`--`) and block (`/* */`) comments are stripped, whitespace runs
/// collapse to a single space, everything outside string literals is
/// upper-cased, string literals are preserved verbatim, host variables
/// (`:ident`) become the placeholder `:?`, and a trailing semicolon is
/// dropped. Normalizing twice yields the same string.
pub fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut pending_space = false;

    let flush = |out: &mut String, pending: &mut bool| {
        if *pending && !out.is_empty() {
            out.push(' ');
        }
        *pending = false;
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                flush(&mut out, &mut pending_space);
                out.push(c);
                while let Some(s) = chars.next() {
                    out.push(s);
                    if s == c {
                        if chars.peek() == Some(&c) {
                            out.push(chars.next().unwrap());
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        break;
                    }
                }
                pending_space = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut star = false;
                for s in chars.by_ref() {
                    if star && s == '/' {
                        break;
                    }
                    star = s == '*';
                }
                pending_space = true;
            }
            ':' if chars.peek().is_some_and(|&s| s.is_alphabetic() || s == '_') => {
                flush(&mut out, &mut pending_space);
                out.push_str(":?");
                while chars.peek().is_some_and(|&s| s.is_alphanumeric() || s == '_') {
                    chars.next();
                }
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            _ => {
                flush(&mut out, &mut pending_space);
                out.extend(c.to_uppercase());
            }
        }
    }

    let trimmed = out.trim_end_matches(';').trim();
    if trimmed.len() == out.len() {
        out
    } else {
        trimmed.to_owned()
    }
}

/// Classify a normalized statement by its leading keyword.
pub fn infer_kind(norm: &str) -> SqlKind {
    match norm.split_whitespace().next() {
        Some("SELECT") => SqlKind::Select,
        Some("INSERT") => SqlKind::Insert,
        Some("UPDATE") => SqlKind::Update,
        Some("DELETE") => SqlKind::Delete,
        Some("MERGE") => SqlKind::Merge,
        _ => SqlKind::Other,
    }
}

#[derive(Debug, PartialEq)]
enum SqlTok {
    Word(String),
    Punct(char),
}

/// Split a normalized statement into words and punctuation, skipping
/// string literals. Qualified names (`schema.table`) come out as one word.
fn scan(norm: &str) -> Vec<SqlTok> {
    let mut toks = Vec::new();
    let mut chars = norm.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                // Doubled quotes are escapes, not terminators.
                while let Some(s) = chars.next() {
                    if s == c {
                        if chars.peek() == Some(&c) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' || c == '#' => {
                let mut word = String::from(c);
                while chars
                    .peek()
                    .is_some_and(|&s| s.is_alphanumeric() || s == '_' || s == '$' || s == '#' || s == '.')
                {
                    word.push(chars.next().unwrap());
                }
                toks.push(SqlTok::Word(word));
            }
            ' ' => {}
            _ => toks.push(SqlTok::Punct(c)),
        }
    }
    toks
}

/// Keywords that end a FROM table list.
const CLAUSE_KEYWORDS: &[&str] = &[
    "CROSS", "FULL", "GROUP", "HAVING", "INNER", "JOIN", "LEFT", "LIMIT", "ON", "ORDER", "OUTER",
    "RIGHT", "SET", "UNION", "USING", "VALUES", "WHEN", "WHERE",
];

fn is_clause_keyword(word: &str) -> bool {
    CLAUSE_KEYWORDS.binary_search(&word).is_ok()
}

/// Reduce a (possibly qualified) identifier to a bare lower-case table
/// name. Returns None for anything that cannot be a table reference.
fn bare_table_name(word: &str) -> Option<String> {
    let bare = word.rsplit('.').next().unwrap_or(word);
    let first = bare.chars().next()?;
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }
    Some(bare.to_lowercase())
}

struct TableRefs<'a> {
    refs: Vec<(String, RwType)>,
    seen: AHashSet<(String, RwType)>,
    exceptions: &'a AHashSet<String>,
}

impl TableRefs<'_> {
    fn push(&mut self, name: Option<String>, rw: RwType) {
        let Some(name) = name else { return };
        if self.exceptions.contains(&name) {
            return;
        }
        if self.seen.insert((name.clone(), rw)) {
            self.refs.push((name, rw));
        }
    }
}

/// Extract the set of (table, read/write) references from a normalized
/// statement, according to its kind. Tables in `exceptions` (already
/// lower-case) are suppressed.
pub fn extract_tables(
    norm: &str,
    kind: SqlKind,
    exceptions: &AHashSet<String>,
) -> Vec<(String, RwType)> {
    let toks = scan(norm);
    let mut out = TableRefs {
        refs: Vec::new(),
        seen: AHashSet::new(),
        exceptions,
    };

    let word_after = |marker: &str| {
        toks.iter()
            .position(|t| matches!(t, SqlTok::Word(w) if w == marker))
            .and_then(|i| match toks.get(i + 1) {
                Some(SqlTok::Word(w)) => bare_table_name(w),
                _ => None,
            })
    };

    match kind {
        SqlKind::Select => {
            collect_from_join_reads(&toks, &mut out);
        }
        SqlKind::Insert => {
            out.push(word_after("INTO"), RwType::Write);
            collect_from_join_reads(&toks, &mut out);
        }
        SqlKind::Update => {
            out.push(word_after("UPDATE"), RwType::Write);
            collect_from_join_reads(&toks, &mut out);
        }
        SqlKind::Delete => {
            out.push(word_after("FROM"), RwType::Write);
        }
        SqlKind::Merge => {
            out.push(word_after("INTO"), RwType::Write);
            out.push(word_after("USING"), RwType::Read);
            collect_from_join_reads(&toks, &mut out);
        }
        SqlKind::Other => {}
    }

    out.refs
}

/// Every identifier following `FROM` or `JOIN` is a read table, up to the
/// next clause keyword. Aliases (with or without `AS`) are dropped;
/// parenthesized subqueries are skipped here because the flat scan picks
/// up their own `FROM`/`JOIN` markers.
fn collect_from_join_reads(toks: &[SqlTok], out: &mut TableRefs) {
    let mut i = 0;
    while i < toks.len() {
        let marker = match &toks[i] {
            SqlTok::Word(w) if w == "FROM" || w == "JOIN" => w.clone(),
            _ => {
                i += 1;
                continue;
            }
        };
        i += 1;

        // One table for JOIN; a comma-separated list for FROM.
        loop {
            match toks.get(i) {
                Some(SqlTok::Word(w)) if !is_clause_keyword(w) => {
                    out.push(bare_table_name(w), RwType::Read);
                    i += 1;
                    // Skip `AS` and alias words until a separator.
                    while let Some(SqlTok::Word(w)) = toks.get(i) {
                        if is_clause_keyword(w) {
                            break;
                        }
                        i += 1;
                    }
                }
                _ => break,
            }
            if marker == "FROM" && matches!(toks.get(i), Some(SqlTok::Punct(','))) {
                i += 1;
                continue;
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn no_exceptions() -> AHashSet<String> {
        AHashSet::new()
    }

    fn tables(sql: &str) -> Vec<(String, RwType)> {
        let norm = normalize(sql);
        extract_tables(&norm, infer_kind(&norm), &no_exceptions())
    }

    #[test]
    fn normalize_collapses_case_whitespace_and_comments() {
        let sql = "select  a,\n\tb -- trailing\nfrom tb_a /* x */ where k = :key ;";
        assert_eq!(normalize(sql), "SELECT A, B FROM TB_A WHERE K = :?");
    }

    #[test]
    fn normalize_preserves_string_literals() {
        assert_eq!(
            normalize("select 'It''s lower' from t"),
            "SELECT 'It''s lower' FROM T"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "select a from t where k = :k;",
            "INSERT INTO t(a) VALUES ('x;y')",
            "update s.t set a = 1 -- c",
            "/* lead */ delete from t",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn kind_inference() {
        assert_eq!(infer_kind(&normalize("select 1")), SqlKind::Select);
        assert_eq!(infer_kind(&normalize("  insert into t values (1)")), SqlKind::Insert);
        assert_eq!(infer_kind(&normalize("MERGE INTO t USING s ON 1=1")), SqlKind::Merge);
        assert_eq!(infer_kind(&normalize("declare c cursor for select 1")), SqlKind::Other);
        assert_eq!(infer_kind(""), SqlKind::Other);
    }

    #[test]
    fn select_from_and_join_are_reads() {
        assert_eq!(
            tables("SELECT x FROM tb_a JOIN tb_b ON tb_a.k = tb_b.k"),
            vec![("tb_a".into(), RwType::Read), ("tb_b".into(), RwType::Read)]
        );
    }

    #[test]
    fn select_comma_list_drops_aliases() {
        assert_eq!(
            tables("SELECT 1 FROM tb_a a, tb_b AS b WHERE a.k = b.k"),
            vec![("tb_a".into(), RwType::Read), ("tb_b".into(), RwType::Read)]
        );
    }

    #[test]
    fn insert_target_is_write_nested_select_is_read() {
        assert_eq!(
            tables("INSERT INTO tb_y(a) SELECT a FROM tb_src"),
            vec![("tb_y".into(), RwType::Write), ("tb_src".into(), RwType::Read)]
        );
        assert_eq!(tables("INSERT INTO tb_y(a) VALUES(1)"), vec![("tb_y".into(), RwType::Write)]);
    }

    #[test]
    fn update_target_is_write() {
        assert_eq!(
            tables("UPDATE tb_x SET a = 1 WHERE k = :k"),
            vec![("tb_x".into(), RwType::Write)]
        );
    }

    #[test]
    fn delete_target_is_write() {
        assert_eq!(tables("DELETE FROM tb_x WHERE k = 1"), vec![("tb_x".into(), RwType::Write)]);
    }

    #[test]
    fn merge_into_writes_using_reads() {
        assert_eq!(
            tables("MERGE INTO tb_t USING tb_s ON tb_t.k = tb_s.k WHEN MATCHED THEN UPDATE SET a = 1"),
            vec![("tb_t".into(), RwType::Write), ("tb_s".into(), RwType::Read)]
        );
    }

    #[test]
    fn schema_prefix_is_stripped() {
        assert_eq!(
            tables("SELECT 1 FROM hr.tb_emp"),
            vec![("tb_emp".into(), RwType::Read)]
        );
    }

    #[test]
    fn exception_list_suppresses_tables() {
        let norm = normalize("SELECT sysdate FROM dual");
        let exceptions: AHashSet<String> = ["dual".to_owned()].into_iter().collect();
        assert_eq!(extract_tables(&norm, SqlKind::Select, &exceptions), vec![]);
    }

    #[test]
    fn other_kind_yields_no_tables() {
        assert_eq!(tables("DECLARE emp_cur CURSOR FOR SELECT a FROM tb_a"), vec![]);
        assert_eq!(tables("COMMIT"), vec![]);
    }

    #[test]
    fn doubled_quote_in_literal_does_not_swallow_the_from_clause() {
        assert_eq!(
            tables("SELECT 1 FROM tb_a WHERE x = 'it''s'"),
            vec![("tb_a".into(), RwType::Read)]
        );
        assert_eq!(
            tables("SELECT 'a''b', c FROM tb_q"),
            vec![("tb_q".into(), RwType::Read)]
        );
    }

    #[test]
    fn subquery_in_from_reads_inner_tables_only() {
        assert_eq!(
            tables("SELECT 1 FROM (SELECT a FROM tb_inner) x"),
            vec![("tb_inner".into(), RwType::Read)]
        );
    }
}
