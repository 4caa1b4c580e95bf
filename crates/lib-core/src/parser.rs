use std::fmt;
use std::ops::Range;

use crate::ir::ObjectKind;
use crate::lexer::{Token, TokenKind, lex};

/// A recovered parse error. These are collected, never thrown: the parser
/// resyncs to the next statement boundary and keeps going.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseIssue {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

/// Where inside an object a statement or call site was found.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BodyOwner {
    Event(String),
    Function(String),
}

impl BodyOwner {
    pub fn name(&self) -> &str {
        match self {
            BodyOwner::Event(name) | BodyOwner::Function(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventDecl {
    pub name: String,
    pub line: usize,
    pub body_span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub signature: Option<String>,
    pub line: usize,
    pub body_span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedSql {
    pub owner: BodyOwner,
    /// Raw statement text as written, reassembled from the SQL block
    /// tokens. Normalization happens downstream.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CallSiteKind {
    /// `IDENT(...)` — a candidate until the analyzer finds a matching
    /// function declaration somewhere in the run.
    FunctionCall,
    ScreenOpen,
    EventTrigger,
    DataWindowUse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub caller: BodyOwner,
    pub callee: String,
    pub kind: CallSiteKind,
    pub line: usize,
}

/// Shallow syntactic model of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub object_kind: ObjectKind,
    pub object_name: String,
    pub events: Vec<EventDecl>,
    pub functions: Vec<FunctionDecl>,
    pub sql: Vec<EmbeddedSql>,
    pub call_sites: Vec<CallSite>,
    pub issues: Vec<ParseIssue>,
    /// True when the error cap was hit. An abandoned file contributes a
    /// file-level failure and none of its records reach the analyzer.
    pub abandoned: bool,
}

pub struct Parser {
    max_errors_per_file: usize,
}

impl Parser {
    pub fn new(max_errors_per_file: usize) -> Self {
        Self { max_errors_per_file }
    }

    /// Parse one source text. `default_kind` comes from the file
    /// extension, `fallback_name` from the file stem; the type preamble
    /// overrides both where present.
    pub fn parse(&self, text: &str, default_kind: ObjectKind, fallback_name: &str) -> ParsedFile {
        let tokens = lex(text);
        let (object_kind, object_name) = infer_object(&tokens, default_kind, fallback_name);

        let mut parsed = ParsedFile {
            object_kind,
            object_name,
            events: Vec::new(),
            functions: Vec::new(),
            sql: Vec::new(),
            call_sites: Vec::new(),
            issues: Vec::new(),
            abandoned: false,
        };

        let mut walker = Walker {
            tokens: &tokens,
            pos: 0,
        };
        self.parse_top_level(&mut walker, &mut parsed);

        if !parsed.abandoned {
            let events = std::mem::take(&mut parsed.events);
            for event in &events {
                scan_body(
                    &tokens,
                    event.body_span.clone(),
                    BodyOwner::Event(event.name.clone()),
                    &mut parsed,
                );
            }
            parsed.events = events;

            let functions = std::mem::take(&mut parsed.functions);
            for function in &functions {
                scan_body(
                    &tokens,
                    function.body_span.clone(),
                    BodyOwner::Function(function.name.clone()),
                    &mut parsed,
                );
            }
            parsed.functions = functions;
        }

        parsed
    }

    fn parse_top_level(&self, walker: &mut Walker, parsed: &mut ParsedFile) {
        loop {
            let Some(token) = walker.peek_significant() else {
                break;
            };

            match (token.kind, token.text.as_str()) {
                (TokenKind::Keyword, "forward") => {
                    walker.advance_significant();
                    walker.skip_until_end_of(&["forward", "prototypes"]);
                }
                (TokenKind::Keyword, "type") => {
                    walker.advance_significant();
                    match walker.peek_significant() {
                        Some(t) if t.kind == TokenKind::Ident && t.text == "variables" => {
                            walker.advance_significant();
                            walker.skip_until_end_of(&["variables"]);
                        }
                        _ => walker.skip_until_end_of(&["type"]),
                    }
                }
                (TokenKind::Keyword, "global" | "shared")
                    if walker.next_significant_is_ident("variables") =>
                {
                    walker.advance_significant();
                    walker.advance_significant();
                    walker.skip_until_end_of(&["variables"]);
                }
                (
                    TokenKind::Keyword,
                    "global" | "shared" | "public" | "private" | "protected",
                ) => {
                    walker.advance_significant();
                }
                (TokenKind::Keyword, "event" | "on") => {
                    if !self.parse_event(walker, parsed) {
                        return;
                    }
                }
                (TokenKind::Keyword, "function" | "subroutine") => {
                    if !self.parse_function(walker, parsed) {
                        return;
                    }
                }
                (TokenKind::Keyword, "end") => {
                    let (line, col) = (token.line, token.col);
                    walker.advance_significant();
                    if !self.report(parsed, line, col, "unexpected 'end' outside a block") {
                        return;
                    }
                    walker.resync();
                }
                (TokenKind::Eof, _) => break,
                _ => {
                    // Top-level property assignments and other noise are
                    // not interesting and not errors.
                    walker.pos += 1;
                }
            }
        }
    }

    /// Returns false when the error cap was hit and parsing must stop.
    #[must_use]
    fn report(&self, parsed: &mut ParsedFile, line: usize, col: usize, message: &str) -> bool {
        parsed.issues.push(ParseIssue {
            line,
            col,
            message: message.into(),
        });
        if parsed.issues.len() > self.max_errors_per_file {
            parsed.abandoned = true;
            return false;
        }
        true
    }

    fn parse_event(&self, walker: &mut Walker, parsed: &mut ParsedFile) -> bool {
        let header = walker.advance_significant().unwrap();
        let (opener, line, col) = (header.text.clone(), header.line, header.col);
        let terminator = if opener == "on" { "on" } else { "event" };

        let name = match walker.peek_significant() {
            // `event type RET ue_name (...)` declares a typed event.
            Some(t) if t.is_keyword("type") => {
                walker.advance_significant();
                walker.ident_before_args()
            }
            Some(t) if t.kind == TokenKind::Ident || t.kind == TokenKind::Keyword => {
                let mut name = t.text.clone();
                walker.advance_significant();
                // `on w_main.create` qualifies the event with its object.
                while walker.peek_significant().is_some_and(|t| t.is_punct('.')) {
                    walker.advance_significant();
                    match walker.peek_significant() {
                        Some(t) if t.kind == TokenKind::Ident || t.kind == TokenKind::Keyword => {
                            name = t.text.clone();
                            walker.advance_significant();
                        }
                        _ => break,
                    }
                }
                Some(name)
            }
            _ => None,
        };

        let Some(name) = name else {
            let ok = self.report(parsed, line, col, &format!("'{opener}' without an event name"));
            walker.resync();
            return ok;
        };

        walker.skip_header_tail();
        let body_start = walker.pos;
        match walker.skip_to_block_end(terminator) {
            Some(body_end) => {
                parsed.events.push(EventDecl {
                    name,
                    line,
                    body_span: body_start..body_end,
                });
                true
            }
            None => {
                parsed.events.push(EventDecl {
                    name,
                    line,
                    body_span: body_start..walker.pos,
                });
                self.report(parsed, line, col, &format!("missing 'end {terminator}'"))
            }
        }
    }

    fn parse_function(&self, walker: &mut Walker, parsed: &mut ParsedFile) -> bool {
        let header = walker.advance_significant().unwrap();
        let (opener, line, col) = (header.text.clone(), header.line, header.col);

        let sig_start = walker.pos;
        let Some(name) = walker.ident_before_args() else {
            let ok = self.report(
                parsed,
                line,
                col,
                &format!("'{opener}' declaration without a parameter list"),
            );
            walker.resync();
            return ok;
        };
        let signature = render_signature(&walker.tokens[sig_start..walker.pos]);

        walker.skip_header_tail();
        let body_start = walker.pos;
        match walker.skip_to_block_end(&opener) {
            Some(body_end) => {
                parsed.functions.push(FunctionDecl {
                    name,
                    signature,
                    line,
                    body_span: body_start..body_end,
                });
                true
            }
            None => {
                parsed.functions.push(FunctionDecl {
                    name,
                    signature,
                    line,
                    body_span: body_start..walker.pos,
                });
                self.report(parsed, line, col, &format!("missing 'end {opener}'"))
            }
        }
    }
}

/// Token-stream walker with the skip/resync helpers the fail-soft
/// strategy needs.
struct Walker<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Walker<'t> {
    fn significant(token: &Token) -> bool {
        !matches!(token.kind, TokenKind::Comment | TokenKind::Newline)
    }

    fn peek_significant(&mut self) -> Option<&'t Token> {
        while let Some(token) = self.tokens.get(self.pos) {
            if token.kind == TokenKind::Eof {
                return None;
            }
            if Self::significant(token) {
                return Some(token);
            }
            self.pos += 1;
        }
        None
    }

    fn advance_significant(&mut self) -> Option<&'t Token> {
        let token = self.peek_significant()?;
        self.pos += 1;
        Some(token)
    }

    fn next_significant_is_ident(&self, text: &str) -> bool {
        self.tokens[self.pos..]
            .iter()
            .filter(|t| Self::significant(t))
            .nth(1)
            .is_some_and(|t| t.kind == TokenKind::Ident && t.text == text)
    }

    /// Consume tokens up to and including `end <one of terminators>`.
    fn skip_until_end_of(&mut self, terminators: &[&str]) {
        while let Some(token) = self.advance_significant() {
            if token.is_keyword("end")
                && let Some(next) = self.peek_significant()
                && terminators.contains(&next.text.as_str())
            {
                self.pos += 1;
                return;
            }
        }
    }

    /// Consume tokens up to `end <terminator>`, returning the index just
    /// before the `end` keyword, or None at end of input.
    fn skip_to_block_end(&mut self, terminator: &str) -> Option<usize> {
        loop {
            let before = self.pos;
            let token = self.advance_significant()?;
            if token.is_keyword("end")
                && let Some(next) = self.peek_significant()
                && next.text == terminator
            {
                self.pos += 1;
                return Some(before);
            }
        }
    }

    /// Consume the token sequence up to (but not including) `(`, and then
    /// the balanced parameter list. Returns the identifier immediately
    /// before `(`, i.e. the declared name.
    fn ident_before_args(&mut self) -> Option<String> {
        let mut name = None;
        loop {
            let token = self.peek_significant()?;
            match token.kind {
                TokenKind::Ident | TokenKind::Keyword => {
                    name = Some(token.text.clone());
                    self.pos += 1;
                }
                TokenKind::Punct if token.is_punct('(') => break,
                // A declaration header never spans a statement boundary.
                TokenKind::Punct if token.is_punct(';') => return None,
                _ => return None,
            }
        }
        let name = name?;

        let mut depth = 0usize;
        while let Some(token) = self.advance_significant() {
            if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
        }
        Some(name)
    }

    /// Consume the remainder of a declaration header: an optional `;` and
    /// the rest of its line.
    fn skip_header_tail(&mut self) {
        if self.peek_significant().is_some_and(|t| t.is_punct(';')) {
            self.pos += 1;
        }
        while let Some(token) = self.tokens.get(self.pos) {
            match token.kind {
                TokenKind::Newline => {
                    self.pos += 1;
                    break;
                }
                TokenKind::Comment => self.pos += 1,
                TokenKind::Eof => break,
                _ => break,
            }
        }
    }

    /// Fail-soft recovery: skip to the next statement boundary — past a
    /// `;`, or to a line that starts with a block keyword.
    fn resync(&mut self) {
        const TOP: &[&str] = &[
            "end",
            "event",
            "forward",
            "function",
            "global",
            "on",
            "private",
            "protected",
            "public",
            "shared",
            "subroutine",
            "type",
        ];
        while let Some(token) = self.tokens.get(self.pos) {
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Punct if token.is_punct(';') => {
                    self.pos += 1;
                    return;
                }
                TokenKind::Newline => {
                    self.pos += 1;
                    let next = self.tokens[self.pos..]
                        .iter()
                        .find(|t| Self::significant(t));
                    if next.is_some_and(|t| {
                        t.kind == TokenKind::Keyword && TOP.contains(&t.text.as_str())
                    }) {
                        return;
                    }
                }
                _ => self.pos += 1,
            }
        }
    }
}

/// Infer the declared object from the `[global] type NAME from ANCESTOR`
/// preamble. Falls back to the extension-derived kind and the file stem.
fn infer_object(tokens: &[Token], default_kind: ObjectKind, fallback_name: &str) -> (ObjectKind, String) {
    let sig: Vec<&Token> = tokens.iter().filter(|t| Walker::significant(t)).collect();

    let mut first: Option<(ObjectKind, String)> = None;
    for (i, token) in sig.iter().enumerate() {
        if !token.is_keyword("type") {
            continue;
        }
        let Some(name) = sig.get(i + 1).filter(|t| t.kind == TokenKind::Ident) else {
            continue;
        };
        if !sig
            .get(i + 2)
            .is_some_and(|t| t.kind == TokenKind::Ident && t.text == "from")
        {
            continue;
        }
        let Some(ancestor) = sig
            .get(i + 3)
            .filter(|t| t.kind == TokenKind::Ident || t.kind == TokenKind::Keyword)
        else {
            continue;
        };
        // Controls nested inside a container are declared `within` it.
        if sig
            .get(i + 4)
            .is_some_and(|t| t.kind == TokenKind::Ident && t.text == "within")
        {
            continue;
        }

        let kind = match ancestor.text.as_str() {
            "window" => ObjectKind::Screen,
            "userobject" | "nonvisualobject" => ObjectKind::UserObject,
            "menu" => ObjectKind::Menu,
            "datawindow" => ObjectKind::DataWindow,
            _ => default_kind,
        };
        let declared = (kind, name.text.clone());

        if i > 0 && sig[i - 1].is_keyword("global") {
            return declared;
        }
        first.get_or_insert(declared);
    }

    first.unwrap_or_else(|| (default_kind, fallback_name.to_lowercase()))
}

fn render_signature(tokens: &[Token]) -> Option<String> {
    let mut out = String::new();
    for token in tokens.iter().filter(|t| Walker::significant(t)) {
        if token.kind == TokenKind::Eof {
            break;
        }
        let text: &str = &token.text;
        if !out.is_empty() && !matches!(text, "," | ")" | "(") && !out.ends_with('(') {
            out.push(' ');
        }
        out.push_str(text);
    }
    (!out.is_empty()).then_some(out)
}

/// Re-scan a body token span for embedded SQL and call sites.
fn scan_body(tokens: &[Token], span: Range<usize>, owner: BodyOwner, parsed: &mut ParsedFile) {
    let body = &tokens[span.start..span.end.min(tokens.len())];
    let sig: Vec<&Token> = body.iter().filter(|t| Walker::significant(t)).collect();

    let mut i = 0;
    while i < sig.len() {
        let token = sig[i];
        match token.kind {
            TokenKind::SqlBlockStart => {
                let mut text = token.text.clone();
                if let Some(next) = sig.get(i + 1).filter(|t| t.kind == TokenKind::SqlBlockBody) {
                    text.push_str(&next.text);
                    i += 1;
                }
                if sig.get(i + 1).is_some_and(|t| t.kind == TokenKind::SqlBlockEnd) {
                    i += 1;
                }
                parsed.sql.push(EmbeddedSql {
                    owner: owner.clone(),
                    text,
                });
            }
            TokenKind::Keyword if matches!(token.text.as_str(), "open" | "openwithparm") => {
                if sig.get(i + 1).is_some_and(|t| t.is_punct('('))
                    && let Some(target) = sig.get(i + 2).filter(|t| t.kind == TokenKind::Ident)
                {
                    parsed.call_sites.push(CallSite {
                        caller: owner.clone(),
                        callee: target.text.clone(),
                        kind: CallSiteKind::ScreenOpen,
                        line: token.line,
                    });
                    i += 2;
                }
            }
            TokenKind::Keyword if token.text == "triggerevent" => {
                if sig.get(i + 1).is_some_and(|t| t.is_punct('(')) {
                    // `triggerevent("ue_x")` or `triggerevent(target, "ue_x")`;
                    // either way the event name is the first string operand.
                    let mut j = i + 2;
                    let mut callee = None;
                    while let Some(t) = sig.get(j) {
                        if t.kind == TokenKind::Str {
                            callee = Some(t.text.to_lowercase());
                            break;
                        }
                        if t.is_punct(')') || t.is_punct(';') {
                            break;
                        }
                        j += 1;
                    }
                    if let Some(callee) = callee {
                        parsed.call_sites.push(CallSite {
                            caller: owner.clone(),
                            callee,
                            kind: CallSiteKind::EventTrigger,
                            line: token.line,
                        });
                    }
                }
            }
            TokenKind::Ident => {
                let preceded_by_dot = i > 0 && sig[i - 1].is_punct('.');
                if token.text.starts_with("dw_") && sig.get(i + 1).is_some_and(|t| t.is_punct('.'))
                {
                    parsed.call_sites.push(CallSite {
                        caller: owner.clone(),
                        callee: token.text.clone(),
                        kind: CallSiteKind::DataWindowUse,
                        line: token.line,
                    });
                } else if !preceded_by_dot && sig.get(i + 1).is_some_and(|t| t.is_punct('(')) {
                    parsed.call_sites.push(CallSite {
                        caller: owner.clone(),
                        callee: token.text.clone(),
                        kind: CallSiteKind::FunctionCall,
                        line: token.line,
                    });
                }
            }
            _ => {}
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(text: &str) -> ParsedFile {
        Parser::new(100).parse(text, ObjectKind::Screen, "w_test")
    }

    const SCREEN: &str = "\
$PBExportHeader$w_customer.srw
forward
global type w_customer from window
end type
end forward

global type w_customer from window
integer width = 2700
end type

event ue_save;
UPDATE tb_customer SET name = :ls_name WHERE id = :ll_id;
if sqlca.sqlcode <> 0 then
    rollback;
else
    commit;
end if
end event

on w_customer.open;
open(w_detail)
triggerevent(\"ue_save\")
end on

global function integer wf_count (string as_filter);
long ll_n
SELECT count(*) INTO :ll_n FROM tb_customer WHERE name LIKE :as_filter;
return ll_n
end function
";

    #[test]
    fn object_from_preamble() {
        let parsed = parse(SCREEN);
        assert_eq!(parsed.object_kind, ObjectKind::Screen);
        assert_eq!(parsed.object_name, "w_customer");
        assert!(parsed.issues.is_empty(), "{:?}", parsed.issues);
    }

    #[test]
    fn events_and_functions_are_collected() {
        let parsed = parse(SCREEN);
        let event_names: Vec<_> = parsed.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(event_names, vec!["ue_save", "open"]);

        assert_eq!(parsed.functions.len(), 1);
        let f = &parsed.functions[0];
        assert_eq!(f.name, "wf_count");
        assert_eq!(f.signature.as_deref(), Some("integer wf_count(string as_filter)"));
    }

    #[test]
    fn embedded_sql_is_attached_to_its_owner() {
        let parsed = parse(SCREEN);
        let owners: Vec<_> = parsed
            .sql
            .iter()
            .map(|s| (s.owner.clone(), s.text.split_whitespace().next().unwrap().to_owned()))
            .collect();
        assert_eq!(
            owners,
            vec![
                (BodyOwner::Event("ue_save".into()), "update".into()),
                (BodyOwner::Event("ue_save".into()), "rollback".into()),
                (BodyOwner::Event("ue_save".into()), "commit".into()),
                (BodyOwner::Function("wf_count".into()), "select".into()),
            ]
        );
    }

    #[test]
    fn call_sites_are_detected() {
        let parsed = parse(SCREEN);
        let opens: Vec<_> = parsed
            .call_sites
            .iter()
            .filter(|c| c.kind == CallSiteKind::ScreenOpen)
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(opens, vec!["w_detail"]);

        let triggers: Vec<_> = parsed
            .call_sites
            .iter()
            .filter(|c| c.kind == CallSiteKind::EventTrigger)
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(triggers, vec!["ue_save"]);
    }

    #[test]
    fn trigger_event_two_argument_form() {
        let text = "event ue_go;\nthis.triggerevent(w_main, \"ue_Refresh\")\nend event\n";
        let parsed = parse(text);
        let site = parsed
            .call_sites
            .iter()
            .find(|c| c.kind == CallSiteKind::EventTrigger)
            .unwrap();
        assert_eq!(site.callee, "ue_refresh");
    }

    #[test]
    fn function_call_candidates_skip_dotted_methods() {
        let text = "event clicked;\nwf_refresh(1)\ndw_list.retrieve()\nend event\n";
        let parsed = parse(text);
        let calls: Vec<_> = parsed
            .call_sites
            .iter()
            .filter(|c| c.kind == CallSiteKind::FunctionCall)
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(calls, vec!["wf_refresh"]);

        let dws: Vec<_> = parsed
            .call_sites
            .iter()
            .filter(|c| c.kind == CallSiteKind::DataWindowUse)
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(dws, vec!["dw_list"]);
    }

    #[test]
    fn user_object_preamble() {
        let text = "global type u_helpers from nonvisualobject\nend type\n";
        let parsed = Parser::new(100).parse(text, ObjectKind::UserObject, "u_helpers");
        assert_eq!(parsed.object_kind, ObjectKind::UserObject);
        assert_eq!(parsed.object_name, "u_helpers");
    }

    #[test]
    fn fallback_to_extension_and_stem() {
        let parsed = Parser::new(100).parse("// empty\n", ObjectKind::Menu, "M_MAIN");
        assert_eq!(parsed.object_kind, ObjectKind::Menu);
        assert_eq!(parsed.object_name, "m_main");
    }

    #[test]
    fn nested_control_type_does_not_rename_the_object() {
        let text = "\
global type w_main from window
end type
type dw_list from datawindow within w_main
end type
";
        let parsed = parse(text);
        assert_eq!(parsed.object_name, "w_main");
        assert_eq!(parsed.object_kind, ObjectKind::Screen);
    }

    #[test]
    fn errors_are_recovered_and_recorded() {
        let text = "\
event ;
event ue_ok;
return
end event
";
        let parsed = parse(text);
        assert_eq!(parsed.issues.len(), 1);
        assert!(!parsed.abandoned);
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].name, "ue_ok");
    }

    #[test]
    fn error_cap_abandons_the_file() {
        let mut text = String::new();
        for _ in 0..4 {
            text.push_str("event ;\n");
        }
        let parsed = Parser::new(3).parse(&text, ObjectKind::Screen, "w_bad");
        assert!(parsed.abandoned);
        assert_eq!(parsed.issues.len(), 4);
    }

    #[test]
    fn missing_end_event_is_an_error_but_keeps_the_event() {
        let parsed = parse("event ue_x;\nreturn\n");
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.issues.len(), 1);
        assert!(parsed.issues[0].message.contains("end event"));
    }
}
