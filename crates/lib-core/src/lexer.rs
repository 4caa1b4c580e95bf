use std::str::Chars;

/// Token categories produced by the lexer.
///
/// The lexer is deliberately shallow: it only knows enough about the source
/// grammar to split it into words, literals and embedded SQL blocks. All
/// structural interpretation happens in the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TokenKind {
    Comment,
    Str,
    Ident,
    Keyword,
    Number,
    Punct,
    SqlBlockStart,
    SqlBlockBody,
    SqlBlockEnd,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Canonical text. Identifiers and keywords are lower-cased; string
    /// tokens carry their unescaped content without quotes; SQL block
    /// tokens carry the raw source slice.
    pub text: String,
    pub line: usize,
    pub col: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }

    pub fn is_punct(&self, ch: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == 1 && self.text.starts_with(ch)
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == kw
    }
}

/// Control words of the source language. Identifiers are matched against
/// this set after lower-casing, so the set itself is lower-case.
const KEYWORDS: &[&str] = &[
    "case",
    "choose",
    "close",
    "create",
    "destroy",
    "do",
    "else",
    "elseif",
    "end",
    "event",
    "for",
    "forward",
    "function",
    "global",
    "goto",
    "if",
    "loop",
    "next",
    "on",
    "open",
    "openwithparm",
    "private",
    "protected",
    "public",
    "return",
    "returns",
    "shared",
    "subroutine",
    "then",
    "to",
    "trigger",
    "triggerevent",
    "type",
    "until",
    "while",
];

/// Keywords that can open an embedded SQL block when they appear at a
/// statement boundary and are not immediately followed by `(` (the
/// call-forms `open(...)` / `close(...)` belong to the host language).
const SQL_STARTERS: &[&str] = &[
    "close", "commit", "declare", "delete", "fetch", "insert", "merge", "open", "rollback",
    "select", "update",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.binary_search(&word).is_ok()
}

fn is_sql_starter(word: &str) -> bool {
    SQL_STARTERS.binary_search(&word).is_ok()
}

struct Cursor<'text> {
    text: &'text str,
    chars: Chars<'text>,
    line: usize,
    col: usize,
}

impl<'text> Cursor<'text> {
    const EOF: char = '\0';

    fn new(text: &'text str) -> Self {
        Self {
            text,
            chars: text.chars(),
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> char {
        self.chars.clone().next().unwrap_or(Self::EOF)
    }

    fn peek_second(&self) -> char {
        let mut chars = self.chars.clone();
        chars.next();
        chars.next().unwrap_or(Self::EOF)
    }

    /// First character after any run of spaces and tabs, without consuming.
    fn peek_past_blank(&self) -> char {
        self.chars
            .clone()
            .find(|&c| c != ' ' && c != '\t' && c != '\r')
            .unwrap_or(Self::EOF)
    }

    fn shift(&mut self) -> char {
        let c = self.chars.next().unwrap_or(Self::EOF);
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else if c != Self::EOF {
            self.col += 1;
        }
        c
    }

    fn shift_while(&mut self, f: impl Fn(char) -> bool + Copy) {
        while self.peek() != Self::EOF && f(self.peek()) {
            self.shift();
        }
    }

    fn offset(&self) -> usize {
        self.text.len() - self.chars.as_str().len()
    }

    fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }
}

/// Tokenize a source text. Pure function; never fails. Unknown characters
/// come out as single-character `Punct` tokens.
pub fn lex(text: &str) -> Vec<Token> {
    let mut cursor = Cursor::new(text);
    let mut tokens = Vec::new();
    // True at the beginning of a statement: start of input, after a
    // newline or semicolon, and after `then`/`else`/`loop`. Embedded SQL
    // is only recognized at these positions.
    let mut at_statement_start = true;

    loop {
        let (line, col) = (cursor.line, cursor.col);
        let c = cursor.peek();

        if cursor.is_eof() {
            tokens.push(Token::new(TokenKind::Eof, "", line, col));
            break;
        }

        match c {
            '\n' => {
                cursor.shift();
                tokens.push(Token::new(TokenKind::Newline, "\n", line, col));
                at_statement_start = true;
            }
            ' ' | '\t' | '\r' => {
                cursor.shift();
            }
            '/' if cursor.peek_second() == '/' => {
                let start = cursor.offset();
                cursor.shift_while(|c| c != '\n');
                tokens.push(Token::new(
                    TokenKind::Comment,
                    &cursor.text[start..cursor.offset()],
                    line,
                    col,
                ));
            }
            '/' if cursor.peek_second() == '*' => {
                let start = cursor.offset();
                cursor.shift();
                cursor.shift();
                loop {
                    if cursor.is_eof() {
                        break;
                    }
                    if cursor.peek() == '*' && cursor.peek_second() == '/' {
                        cursor.shift();
                        cursor.shift();
                        break;
                    }
                    cursor.shift();
                }
                tokens.push(Token::new(
                    TokenKind::Comment,
                    &cursor.text[start..cursor.offset()],
                    line,
                    col,
                ));
            }
            // Export-format meta lines such as `$PBExportHeader$w_main.srw`.
            '$' => {
                let start = cursor.offset();
                cursor.shift_while(|c| c != '\n');
                tokens.push(Token::new(
                    TokenKind::Comment,
                    &cursor.text[start..cursor.offset()],
                    line,
                    col,
                ));
            }
            '"' | '\'' => {
                let content = lex_string(&mut cursor, c);
                tokens.push(Token::new(TokenKind::Str, content, line, col));
                at_statement_start = false;
            }
            c if c.is_ascii_digit() => {
                let start = cursor.offset();
                cursor.shift_while(|c| c.is_ascii_digit());
                if cursor.peek() == '.' && cursor.peek_second().is_ascii_digit() {
                    cursor.shift();
                    cursor.shift_while(|c| c.is_ascii_digit());
                }
                tokens.push(Token::new(
                    TokenKind::Number,
                    &cursor.text[start..cursor.offset()],
                    line,
                    col,
                ));
                at_statement_start = false;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = cursor.offset();
                cursor.shift_while(|c| c.is_alphanumeric() || c == '_');
                let word = cursor.text[start..cursor.offset()].to_lowercase();

                if at_statement_start && is_sql_starter(&word) && cursor.peek_past_blank() != '(' {
                    lex_sql_block(&mut cursor, &mut tokens, &word, line, col);
                    at_statement_start = true;
                } else {
                    let kind = if is_keyword(&word) {
                        TokenKind::Keyword
                    } else {
                        TokenKind::Ident
                    };
                    at_statement_start =
                        kind == TokenKind::Keyword && matches!(word.as_str(), "then" | "else" | "loop");
                    tokens.push(Token::new(kind, word, line, col));
                }
            }
            _ => {
                cursor.shift();
                tokens.push(Token::new(TokenKind::Punct, c, line, col));
                at_statement_start = c == ';';
            }
        }
    }

    tokens
}

/// Consume a quoted literal. The opening quote has not been shifted yet.
/// Escape is by doubling the quote character; literals do not span lines.
fn lex_string(cursor: &mut Cursor, quote: char) -> String {
    cursor.shift();
    let mut content = String::new();
    loop {
        let c = cursor.peek();
        if c == Cursor::EOF || c == '\n' {
            break;
        }
        cursor.shift();
        if c == quote {
            if cursor.peek() == quote {
                cursor.shift();
                content.push(quote);
            } else {
                break;
            }
        } else {
            content.push(c);
        }
    }
    content
}

/// Capture an embedded SQL block. The opening keyword has already been
/// consumed; the block runs to the first `;` at parenthesis depth zero
/// that is outside string literals and SQL comments. A missing terminator
/// ends the block at end of input with an empty `SqlBlockEnd`.
fn lex_sql_block(
    cursor: &mut Cursor,
    tokens: &mut Vec<Token>,
    keyword: &str,
    line: usize,
    col: usize,
) {
    tokens.push(Token::new(TokenKind::SqlBlockStart, keyword, line, col));

    let start = cursor.offset();
    let mut depth = 0usize;
    let mut terminated = false;

    while !cursor.is_eof() {
        let c = cursor.peek();
        match c {
            '\'' | '"' => {
                lex_string(cursor, c);
            }
            '-' if cursor.peek_second() == '-' => {
                cursor.shift_while(|c| c != '\n');
            }
            '/' if cursor.peek_second() == '*' => {
                cursor.shift();
                cursor.shift();
                loop {
                    if cursor.is_eof() {
                        break;
                    }
                    if cursor.peek() == '*' && cursor.peek_second() == '/' {
                        cursor.shift();
                        cursor.shift();
                        break;
                    }
                    cursor.shift();
                }
            }
            '(' => {
                depth += 1;
                cursor.shift();
            }
            ')' => {
                depth = depth.saturating_sub(1);
                cursor.shift();
            }
            ';' if depth == 0 => {
                terminated = true;
                break;
            }
            _ => {
                cursor.shift();
            }
        }
    }

    let (body_line, body_col) = (cursor.line, cursor.col);
    tokens.push(Token::new(
        TokenKind::SqlBlockBody,
        &cursor.text[start..cursor.offset()],
        line,
        col,
    ));
    if terminated {
        cursor.shift();
        tokens.push(Token::new(TokenKind::SqlBlockEnd, ";", body_line, body_col));
    } else {
        tokens.push(Token::new(TokenKind::SqlBlockEnd, "", body_line, body_col));
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex(text).into_iter().map(|t| t.kind).collect()
    }

    fn texts_of(text: &str, kind: TokenKind) -> Vec<String> {
        lex(text)
            .into_iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn identifiers_are_lowercased() {
        let tokens = lex("Li_Count = WF_Total()");
        assert_eq!(tokens[0].text, "li_count");
        assert_eq!(tokens[2].text, "wf_total");
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = lex("IF x THEN RETURN");
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[2].kind, TokenKind::Keyword);
        assert_eq!(tokens[3].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
    }

    #[test]
    fn string_escape_by_doubling() {
        let tokens = lex(r#"ls_msg = "it''s a ""test""""#);
        let strings: Vec<_> = tokens.iter().filter(|t| t.kind == TokenKind::Str).collect();
        assert_eq!(strings[0].text, r#"it''s a "test""#);

        let tokens = lex("ls_q = 'don''t'");
        let strings: Vec<_> = tokens.iter().filter(|t| t.kind == TokenKind::Str).collect();
        assert_eq!(strings[0].text, "don't");
    }

    #[test]
    fn comments_line_and_block() {
        assert_eq!(
            kinds("// to end\n/* block\nspanning */ x"),
            vec![
                TokenKind::Comment,
                TokenKind::Newline,
                TokenKind::Comment,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn export_header_is_comment() {
        let tokens = lex("$PBExportHeader$w_main.srw\nforward");
        assert_eq!(tokens[0].kind, TokenKind::Comment);
        assert_eq!(tokens[0].text, "$PBExportHeader$w_main.srw");
    }

    #[test]
    fn numbers() {
        assert_eq!(
            texts_of("x = 12 + 3.25", TokenKind::Number),
            vec!["12", "3.25"]
        );
    }

    #[test]
    fn sql_block_is_captured_to_semicolon() {
        let tokens = lex("UPDATE tb_x SET a = 1 WHERE k = :k;\nreturn");
        assert_eq!(tokens[0].kind, TokenKind::SqlBlockStart);
        assert_eq!(tokens[0].text, "update");
        assert_eq!(tokens[1].kind, TokenKind::SqlBlockBody);
        assert_eq!(tokens[1].text, " tb_x SET a = 1 WHERE k = :k");
        assert_eq!(tokens[2].kind, TokenKind::SqlBlockEnd);
        assert_eq!(tokens[3].kind, TokenKind::Newline);
        assert_eq!(tokens[4].kind, TokenKind::Keyword);
    }

    #[test]
    fn sql_block_semicolon_inside_string_or_parens_does_not_terminate() {
        let tokens = lex("SELECT a FROM t WHERE b = 'x;y' AND c IN (1;2);");
        let body = tokens
            .iter()
            .find(|t| t.kind == TokenKind::SqlBlockBody)
            .unwrap();
        assert!(body.text.contains("'x;y'"));
        assert!(body.text.contains("(1;2)"));
    }

    #[test]
    fn open_call_form_is_not_sql() {
        let tokens = lex("open(w_detail)");
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[0].text, "open");
        assert_eq!(tokens[1].kind, TokenKind::Punct);
    }

    #[test]
    fn open_cursor_form_is_sql() {
        let tokens = lex("open emp_cur;");
        assert_eq!(tokens[0].kind, TokenKind::SqlBlockStart);
        assert_eq!(tokens[0].text, "open");
    }

    #[test]
    fn sql_only_at_statement_start() {
        // Mid-statement, `update` is an ordinary identifier reference.
        let tokens = lex("x = update");
        assert!(tokens.iter().all(|t| t.kind != TokenKind::SqlBlockStart));
    }

    #[test]
    fn unterminated_sql_block_ends_at_eof() {
        let tokens = lex("COMMIT");
        assert_eq!(tokens[0].kind, TokenKind::SqlBlockStart);
        let end = tokens
            .iter()
            .find(|t| t.kind == TokenKind::SqlBlockEnd)
            .unwrap();
        assert_eq!(end.text, "");
    }

    #[test]
    fn token_stream_snapshot() {
        let dump: String = lex("event ue_save;\nopen(w_next)\n")
            .iter()
            .map(|t| format!("{:?} {:?}\n", t.kind, t.text))
            .collect();
        expect![[r#"
            Keyword "event"
            Ident "ue_save"
            Punct ";"
            Newline "\n"
            Keyword "open"
            Punct "("
            Ident "w_next"
            Punct ")"
            Newline "\n"
            Eof ""
        "#]]
        .assert_eq(&dump);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let tokens = lex("a\n  b");
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        let b = tokens.iter().find(|t| t.text == "b").unwrap();
        assert_eq!((b.line, b.col), (2, 3));
    }
}
