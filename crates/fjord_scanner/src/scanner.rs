//! The Fjord scanner.
//!
//! Converts source text into tokens. Statement separators (`NewLine`,
//! `NewLines`) are inserted here according to the layout rules: a line
//! break becomes a separator only between a token that can end a statement
//! and one that can start a statement, and only in regions where newlines
//! are significant (tracked with the `sep_regions` stack).
//!
//! The scanner is a single-lookahead cursor. `save_state`/`restore_state`
//! snapshot the complete scanner state as a plain value, which is what the
//! parser's speculative lookahead is built on.

use fjord_ast::name::Names;
use fjord_diagnostics::{messages, Diagnostic, DiagnosticCollection, DiagnosticMessage};

use crate::token::{TokenData, TokenKind};

/// Interpolated-string scanning state, one entry per nesting level.
#[derive(Debug, Clone)]
struct InterpState {
    triple: bool,
    mode: InterpMode,
}

#[derive(Debug, Clone, PartialEq)]
enum InterpMode {
    /// The next fetch reads a literal string part.
    Part,
    /// The next fetch reads the single identifier of a `$ident` escape.
    SingleExpr,
    /// Inside a `${ ... }` escape; the payload is the brace depth.
    Block(u32),
}

/// A complete scanner snapshot. Restoring one rewinds the scanner exactly,
/// including separator regions, interpolation state, and balance counters.
#[derive(Clone)]
pub struct ScannerState {
    pos: usize,
    td: TokenData,
    prev: TokenData,
    pending: Option<TokenData>,
    sep_regions: Vec<TokenKind>,
    interp: Vec<InterpState>,
    balance_paren: i32,
    balance_bracket: i32,
    balance_brace: i32,
    newlines_before: u32,
    diag_len: usize,
}

/// The scanner.
pub struct Scanner<'n> {
    names: &'n Names,
    text: Vec<char>,
    /// Next character to read.
    pos: usize,
    /// The current token.
    td: TokenData,
    /// The previous token.
    prev: TokenData,
    /// A token stashed behind an inserted statement separator.
    pending: Option<TokenData>,
    /// Stack of the closing tokens of enclosing regions. Newlines are
    /// significant only when the innermost region is a brace region.
    sep_regions: Vec<TokenKind>,
    /// Interpolated-string nesting.
    interp: Vec<InterpState>,
    // Running closer-minus-opener counts.
    balance_paren: i32,
    balance_bracket: i32,
    balance_brace: i32,
    /// Line breaks crossed before the current token.
    newlines_before: u32,
    diagnostics: DiagnosticCollection,
}

impl<'n> Scanner<'n> {
    pub fn new(names: &'n Names, source: &str) -> Self {
        let mut scanner = Self {
            names,
            text: source.chars().collect(),
            pos: 0,
            td: TokenData::empty(),
            prev: TokenData::empty(),
            pending: None,
            sep_regions: Vec::new(),
            interp: Vec::new(),
            balance_paren: 0,
            balance_bracket: 0,
            balance_brace: 0,
            newlines_before: 0,
            diagnostics: DiagnosticCollection::new(),
        };
        scanner.next_token();
        scanner
    }

    // ========================================================================
    // Cursor views
    // ========================================================================

    #[inline]
    pub fn token(&self) -> TokenKind {
        self.td.kind
    }

    #[inline]
    pub fn name(&self) -> Option<fjord_ast::name::Name> {
        self.td.name
    }

    #[inline]
    pub fn offset(&self) -> u32 {
        self.td.offset
    }

    #[inline]
    pub fn last_offset(&self) -> u32 {
        self.td.last_offset
    }

    #[inline]
    pub fn str_val(&self) -> &str {
        &self.td.str_val
    }

    #[inline]
    pub fn base(&self) -> u32 {
        self.td.base
    }

    #[inline]
    pub fn current(&self) -> &TokenData {
        &self.td
    }

    #[inline]
    pub fn prev(&self) -> &TokenData {
        &self.prev
    }

    /// Line breaks crossed immediately before the current token.
    #[inline]
    pub fn newlines_before_current(&self) -> u32 {
        self.newlines_before
    }

    /// The next token, without advancing. Implemented as a
    /// snapshot-advance-restore round trip.
    pub fn peek(&mut self) -> TokenData {
        let state = self.save_state();
        self.next_token();
        let ahead = self.td.clone();
        self.restore_state(state);
        ahead
    }

    /// Running count of the given closing delimiter seen so far, minus its
    /// opener. Negative while inside unclosed openers.
    pub fn paren_balance(&self, kind: TokenKind) -> i32 {
        match kind {
            TokenKind::RParen => self.balance_paren,
            TokenKind::RBracket => self.balance_bracket,
            TokenKind::RBrace => self.balance_brace,
            _ => 0,
        }
    }

    pub fn take_diagnostics(&mut self) -> DiagnosticCollection {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn diagnostics(&self) -> &DiagnosticCollection {
        &self.diagnostics
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn save_state(&self) -> ScannerState {
        ScannerState {
            pos: self.pos,
            td: self.td.clone(),
            prev: self.prev.clone(),
            pending: self.pending.clone(),
            sep_regions: self.sep_regions.clone(),
            interp: self.interp.clone(),
            balance_paren: self.balance_paren,
            balance_bracket: self.balance_bracket,
            balance_brace: self.balance_brace,
            newlines_before: self.newlines_before,
            diag_len: self.diagnostics.len(),
        }
    }

    pub fn restore_state(&mut self, state: ScannerState) {
        // Diagnostics reported during a rolled-back speculation are dropped.
        if self.diagnostics.len() > state.diag_len {
            let mut kept = DiagnosticCollection::new();
            for d in self.diagnostics.diagnostics().iter().take(state.diag_len) {
                kept.add(d.clone());
            }
            self.diagnostics = kept;
        }
        self.pos = state.pos;
        self.td = state.td;
        self.prev = state.prev;
        self.pending = state.pending;
        self.sep_regions = state.sep_regions;
        self.interp = state.interp;
        self.balance_paren = state.balance_paren;
        self.balance_bracket = state.balance_bracket;
        self.balance_brace = state.balance_brace;
        self.newlines_before = state.newlines_before;
    }

    // ========================================================================
    // Advancing
    // ========================================================================

    /// Advance to the next token.
    pub fn next_token(&mut self) {
        let last_token = self.td.kind;

        // Maintain the separator-region stack for the token moving out.
        match last_token {
            TokenKind::LParen => self.sep_regions.push(TokenKind::RParen),
            TokenKind::LBracket => self.sep_regions.push(TokenKind::RBracket),
            TokenKind::LBrace => self.sep_regions.push(TokenKind::RBrace),
            TokenKind::Case => self.sep_regions.push(TokenKind::Arrow),
            TokenKind::RBrace => {
                while let Some(&top) = self.sep_regions.last() {
                    self.sep_regions.pop();
                    if top == TokenKind::RBrace {
                        break;
                    }
                }
            }
            TokenKind::RParen | TokenKind::RBracket => {
                if self.sep_regions.last() == Some(&last_token) {
                    self.sep_regions.pop();
                }
            }
            TokenKind::Arrow => {
                if self.sep_regions.last() == Some(&TokenKind::Arrow) {
                    self.sep_regions.pop();
                }
            }
            _ => {}
        }

        self.prev = self.td.clone();

        if let Some(pending) = self.pending.take() {
            self.td = pending;
            self.newlines_before = 0;
        } else {
            self.fetch_token();
        }

        // `case` before `class` or `object` opens no pattern region.
        if matches!(self.td.kind, TokenKind::Class | TokenKind::Object)
            && last_token == TokenKind::Case
            && self.sep_regions.last() == Some(&TokenKind::Arrow)
        {
            self.sep_regions.pop();
        }

        // Layout: turn a crossed line break into a statement separator.
        if self.newlines_before > 0
            && last_token.can_end_statement()
            && self.td.kind.can_start_statement()
            && (self.sep_regions.is_empty() || self.sep_regions.last() == Some(&TokenKind::RBrace))
        {
            let sep_kind = if self.newlines_before > 1 {
                TokenKind::NewLines
            } else {
                TokenKind::NewLine
            };
            let mut sep = TokenData::empty();
            sep.kind = sep_kind;
            sep.offset = self.td.last_offset;
            sep.last_offset = self.td.last_offset;
            self.pending = Some(std::mem::replace(&mut self.td, sep));
        }
    }

    /// Advance and return the offset of the token that was consumed.
    pub fn skip_token(&mut self) -> u32 {
        let offset = self.td.offset;
        self.next_token();
        offset
    }

    // ========================================================================
    // Character helpers
    // ========================================================================

    #[inline]
    fn ch(&self) -> Option<char> {
        self.text.get(self.pos).copied()
    }

    #[inline]
    fn ch_at(&self, offset: usize) -> Option<char> {
        self.text.get(self.pos + offset).copied()
    }

    #[inline]
    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn error_at(&mut self, offset: u32, message: &DiagnosticMessage, args: &[&str]) {
        self.diagnostics
            .add(Diagnostic::report(message, args).at_offset(offset));
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Scan one raw token into `td`, without layout processing.
    fn fetch_token(&mut self) {
        let last_off = self.pos as u32;
        self.td.last_offset = last_off;
        self.td.name = None;
        self.td.str_val.clear();
        self.td.base = 10;
        self.newlines_before = 0;

        // Interpolated-string modes bypass trivia skipping.
        let interp_mode = self.interp.last().map(|top| top.mode.clone());
        match interp_mode {
            Some(InterpMode::Part) => {
                self.fetch_string_part();
                return;
            }
            Some(InterpMode::SingleExpr) => {
                self.fetch_interp_ident();
                return;
            }
            _ => {}
        }

        self.skip_trivia();
        self.td.offset = self.pos as u32;

        let ch = match self.ch() {
            Some(c) => c,
            None => {
                self.td.kind = TokenKind::Eof;
                return;
            }
        };

        self.td.kind = match ch {
            '(' => {
                self.pos += 1;
                self.balance_paren -= 1;
                TokenKind::LParen
            }
            ')' => {
                self.pos += 1;
                self.balance_paren += 1;
                TokenKind::RParen
            }
            '[' => {
                self.pos += 1;
                self.balance_bracket -= 1;
                TokenKind::LBracket
            }
            ']' => {
                self.pos += 1;
                self.balance_bracket += 1;
                TokenKind::RBracket
            }
            '{' => {
                self.pos += 1;
                self.balance_brace -= 1;
                self.interp_brace(1);
                TokenKind::LBrace
            }
            '}' => {
                self.pos += 1;
                self.balance_brace += 1;
                self.interp_brace(-1);
                TokenKind::RBrace
            }
            ',' => {
                self.pos += 1;
                TokenKind::Comma
            }
            ';' => {
                self.pos += 1;
                TokenKind::Semi
            }
            '.' => {
                if self.ch_at(1).map_or(false, |c| c.is_ascii_digit()) {
                    self.scan_number()
                } else {
                    self.pos += 1;
                    TokenKind::Dot
                }
            }
            '"' => self.scan_string_literal(),
            '\'' => self.scan_char_or_symbol(),
            '`' => self.scan_backquoted_ident(),
            '0'..='9' => self.scan_number(),
            c if is_identifier_start(c) => self.scan_identifier(),
            c if is_operator_char(c) => self.scan_operator(),
            _ => {
                self.pos += 1;
                self.error_at(self.td.offset, &messages::INVALID_CHARACTER, &[]);
                TokenKind::Unknown
            }
        };
    }

    /// Adjust the innermost interpolation block depth when braces pass by.
    fn interp_brace(&mut self, delta: i32) {
        if let Some(top) = self.interp.last_mut() {
            if let InterpMode::Block(depth) = top.mode {
                let new_depth = (depth as i32 + delta).max(0) as u32;
                if new_depth == 0 && delta < 0 {
                    top.mode = InterpMode::Part;
                } else {
                    top.mode = InterpMode::Block(new_depth);
                }
            }
        }
    }

    /// Skip whitespace and comments, counting crossed line breaks.
    fn skip_trivia(&mut self) {
        loop {
            match self.ch() {
                Some('\n') => {
                    self.newlines_before += 1;
                    self.pos += 1;
                }
                Some('\r') => {
                    self.pos += 1;
                    if self.ch() == Some('\n') {
                        self.pos += 1;
                    }
                    self.newlines_before += 1;
                }
                Some(c) if c.is_whitespace() => {
                    self.pos += 1;
                }
                Some('/') if self.ch_at(1) == Some('/') => {
                    self.pos += 2;
                    while let Some(c) = self.ch() {
                        if c == '\n' || c == '\r' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some('/') if self.ch_at(1) == Some('*') => {
                    let start = self.pos as u32;
                    self.pos += 2;
                    let mut depth = 1;
                    loop {
                        match self.ch() {
                            None => {
                                self.error_at(start, &messages::UNTERMINATED_COMMENT, &[]);
                                break;
                            }
                            Some('*') if self.ch_at(1) == Some('/') => {
                                self.pos += 2;
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some('/') if self.ch_at(1) == Some('*') => {
                                self.pos += 2;
                                depth += 1;
                            }
                            Some(c) => {
                                if c == '\n' {
                                    self.newlines_before += 1;
                                }
                                self.pos += 1;
                            }
                        }
                    }
                }
                _ => return,
            }
        }
    }

    // ========================================================================
    // Identifiers and operators
    // ========================================================================

    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.pos;
        // A lone underscore is its own token; `_x` and `x_+` are identifiers.
        if self.ch() == Some('_') && !self.ch_at(1).map_or(false, is_identifier_part) {
            self.pos += 1;
            return TokenKind::Underscore;
        }
        self.pos += 1;
        while let Some(c) = self.ch() {
            if is_identifier_part(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        // An identifier ending in `_` may continue with an operator tail.
        if self.text[self.pos - 1] == '_' {
            while let Some(c) = self.ch() {
                if is_operator_char(c) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        let text: String = self.text[start..self.pos].iter().collect();

        if let Some(kw) = TokenKind::from_keyword(&text) {
            return kw;
        }

        // An identifier glued to an opening quote starts an interpolated string.
        if self.ch() == Some('"') {
            let triple = self.ch_at(1) == Some('"') && self.ch_at(2) == Some('"');
            self.pos += if triple { 3 } else { 1 };
            self.interp.push(InterpState {
                triple,
                mode: InterpMode::Part,
            });
            self.td.name = Some(self.names.term(&text));
            return TokenKind::InterpolationId;
        }

        self.td.name = Some(self.names.term(&text));
        TokenKind::Ident
    }

    fn scan_operator(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.ch() {
            // A `/` that starts a comment ends the operator run.
            if c == '/' && matches!(self.ch_at(1), Some('/') | Some('*')) && self.pos > start {
                break;
            }
            if is_operator_char(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.text[start..self.pos].iter().collect();
        match text.as_str() {
            "=" => TokenKind::Eq,
            "=>" => TokenKind::Arrow,
            "<-" => TokenKind::LArrow,
            "<:" => TokenKind::Subtype,
            ">:" => TokenKind::Supertype,
            "<%" => TokenKind::ViewBound,
            "#" => TokenKind::Hash,
            "@" => TokenKind::At,
            ":" => TokenKind::Colon,
            _ => {
                self.td.name = Some(self.names.term(&text));
                TokenKind::Ident
            }
        }
    }

    fn scan_backquoted_ident(&mut self) -> TokenKind {
        let offset = self.td.offset;
        self.pos += 1;
        let start = self.pos;
        loop {
            match self.ch() {
                None | Some('\n') => {
                    self.error_at(offset, &messages::UNCLOSED_QUOTED_IDENTIFIER, &[]);
                    break;
                }
                Some('`') => break,
                Some(_) => self.pos += 1,
            }
        }
        let text: String = self.text[start..self.pos].iter().collect();
        if self.ch() == Some('`') {
            self.pos += 1;
        }
        if text.is_empty() {
            self.error_at(offset, &messages::EMPTY_QUOTED_IDENTIFIER, &[]);
        }
        self.td.name = Some(self.names.term(&text));
        TokenKind::BackquotedIdent
    }

    // ========================================================================
    // Literals
    // ========================================================================

    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut is_float = false;

        if self.ch() == Some('0') && matches!(self.ch_at(1), Some('x') | Some('X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.ch().map_or(false, |c| c.is_ascii_hexdigit() || c == '_') {
                self.pos += 1;
            }
            self.td.base = 16;
            self.td.str_val = self.text[digits_start..self.pos]
                .iter()
                .filter(|&&c| c != '_')
                .collect();
            return self.int_suffix();
        }

        while self.ch().map_or(false, |c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
        if self.ch() == Some('.') && self.ch_at(1).map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while self.ch().map_or(false, |c| c.is_ascii_digit() || c == '_') {
                self.pos += 1;
            }
        }
        if matches!(self.ch(), Some('e') | Some('E')) {
            let mut look = 1;
            if matches!(self.ch_at(1), Some('+') | Some('-')) {
                look = 2;
            }
            if self.ch_at(look).map_or(false, |c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += look + 1;
                while self.ch().map_or(false, |c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        self.td.str_val = self.text[start..self.pos]
            .iter()
            .filter(|&&c| c != '_')
            .collect();

        match self.ch() {
            Some('f') | Some('F') => {
                self.pos += 1;
                TokenKind::FloatLit
            }
            Some('d') | Some('D') => {
                self.pos += 1;
                TokenKind::DoubleLit
            }
            Some('l') | Some('L') if !is_float => {
                self.pos += 1;
                TokenKind::LongLit
            }
            _ if is_float => TokenKind::DoubleLit,
            _ => TokenKind::IntLit,
        }
    }

    fn int_suffix(&mut self) -> TokenKind {
        match self.ch() {
            Some('l') | Some('L') => {
                self.pos += 1;
                TokenKind::LongLit
            }
            _ => TokenKind::IntLit,
        }
    }

    fn scan_string_literal(&mut self) -> TokenKind {
        let offset = self.td.offset;
        if self.ch_at(1) == Some('"') && self.ch_at(2) == Some('"') {
            return self.scan_triple_string();
        }
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.ch() {
                None | Some('\n') | Some('\r') => {
                    self.error_at(offset, &messages::UNTERMINATED_STRING_LITERAL, &[]);
                    break;
                }
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    if let Some(c) = self.scan_escape() {
                        value.push(c);
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        self.td.str_val = value;
        TokenKind::StringLit
    }

    fn scan_triple_string(&mut self) -> TokenKind {
        let offset = self.td.offset;
        self.pos += 3;
        let mut value = String::new();
        loop {
            if self.is_eof() {
                self.error_at(offset, &messages::UNTERMINATED_STRING_LITERAL, &[]);
                break;
            }
            if self.ch() == Some('"')
                && self.ch_at(1) == Some('"')
                && self.ch_at(2) == Some('"')
                && self.ch_at(3) != Some('"')
            {
                self.pos += 3;
                break;
            }
            value.push(self.text[self.pos]);
            self.pos += 1;
        }
        self.td.str_val = value;
        TokenKind::StringLit
    }

    /// Scan a `\`-escape; the cursor is on the backslash.
    fn scan_escape(&mut self) -> Option<char> {
        let offset = self.pos as u32;
        self.pos += 1;
        let c = self.ch()?;
        self.pos += 1;
        Some(match c {
            'b' => '\u{0008}',
            't' => '\t',
            'n' => '\n',
            'f' => '\u{000C}',
            'r' => '\r',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            'u' => {
                let mut code = 0u32;
                let mut count = 0;
                while count < 4 {
                    match self.ch().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            code = code * 16 + d;
                            self.pos += 1;
                            count += 1;
                        }
                        None => break,
                    }
                }
                char::from_u32(code).unwrap_or_else(|| {
                    self.error_at(offset, &messages::INVALID_ESCAPE_CHARACTER, &[]);
                    '\u{FFFD}'
                })
            }
            _ => {
                self.error_at(offset, &messages::INVALID_ESCAPE_CHARACTER, &[]);
                c
            }
        })
    }

    fn scan_char_or_symbol(&mut self) -> TokenKind {
        let offset = self.td.offset;
        self.pos += 1;
        match self.ch() {
            None => {
                self.error_at(offset, &messages::UNTERMINATED_CHARACTER_LITERAL, &[]);
                TokenKind::Unknown
            }
            Some('\'') => {
                self.pos += 1;
                self.error_at(offset, &messages::EMPTY_CHARACTER_LITERAL, &[]);
                TokenKind::CharLit
            }
            Some('\\') => {
                let c = self.scan_escape().unwrap_or('\u{FFFD}');
                if self.ch() == Some('\'') {
                    self.pos += 1;
                } else {
                    self.error_at(offset, &messages::UNTERMINATED_CHARACTER_LITERAL, &[]);
                }
                self.td.str_val = c.to_string();
                TokenKind::CharLit
            }
            Some(c) if is_identifier_start(c) && self.ch_at(1) != Some('\'') => {
                // Symbol literal 'name
                let start = self.pos;
                self.pos += 1;
                while self.ch().map_or(false, is_identifier_part) {
                    self.pos += 1;
                }
                let text: String = self.text[start..self.pos].iter().collect();
                self.td.name = Some(self.names.term(&text));
                TokenKind::SymbolLit
            }
            Some(c) if is_operator_char(c) && self.ch_at(1) != Some('\'') => {
                let start = self.pos;
                while self.ch().map_or(false, is_operator_char) {
                    self.pos += 1;
                }
                let text: String = self.text[start..self.pos].iter().collect();
                self.td.name = Some(self.names.term(&text));
                TokenKind::SymbolLit
            }
            Some(c) => {
                self.pos += 1;
                if self.ch() == Some('\'') {
                    self.pos += 1;
                } else {
                    self.error_at(offset, &messages::UNTERMINATED_CHARACTER_LITERAL, &[]);
                }
                self.td.str_val = c.to_string();
                TokenKind::CharLit
            }
        }
    }

    // ========================================================================
    // Interpolated strings
    // ========================================================================

    /// Scan one literal chunk of an interpolated string. A chunk ending
    /// at `$ident` or `${` is a `StringPart` (an embedded expression
    /// follows); the chunk ending at the closing quote(s) is a plain
    /// `StringLit`, which is how the parser knows the interpolation is
    /// over.
    fn fetch_string_part(&mut self) {
        self.td.offset = self.pos as u32;
        let offset = self.td.offset;
        let triple = self.interp.last().map(|s| s.triple).unwrap_or(false);
        let mut value = String::new();
        let mut is_final = true;
        loop {
            match self.ch() {
                None => {
                    self.error_at(offset, &messages::UNTERMINATED_STRING_LITERAL, &[]);
                    self.interp.pop();
                    break;
                }
                Some('\n') | Some('\r') if !triple => {
                    self.error_at(offset, &messages::UNTERMINATED_STRING_LITERAL, &[]);
                    self.interp.pop();
                    break;
                }
                Some('"') if !triple => {
                    self.pos += 1;
                    self.interp.pop();
                    break;
                }
                Some('"')
                    if triple
                        && self.ch_at(1) == Some('"')
                        && self.ch_at(2) == Some('"')
                        && self.ch_at(3) != Some('"') =>
                {
                    self.pos += 3;
                    self.interp.pop();
                    break;
                }
                Some('$') => match self.ch_at(1) {
                    Some('$') => {
                        value.push('$');
                        self.pos += 2;
                    }
                    Some('{') => {
                        self.pos += 1;
                        if let Some(top) = self.interp.last_mut() {
                            top.mode = InterpMode::Block(0);
                        }
                        is_final = false;
                        break;
                    }
                    Some(c) if is_identifier_start(c) || c == '_' => {
                        self.pos += 1;
                        if let Some(top) = self.interp.last_mut() {
                            top.mode = InterpMode::SingleExpr;
                        }
                        is_final = false;
                        break;
                    }
                    _ => {
                        self.error_at(self.pos as u32, &messages::ERROR_IN_INTERPOLATED_STRING, &[]);
                        value.push('$');
                        self.pos += 1;
                    }
                },
                Some('\\') if !triple => {
                    if let Some(c) = self.scan_escape() {
                        value.push(c);
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        self.td.str_val = value;
        self.td.kind = if is_final {
            TokenKind::StringLit
        } else {
            TokenKind::StringPart
        };
    }

    /// Scan the identifier of a `$ident` escape; `this` and `_` keep their
    /// token kinds so the parser can handle them.
    fn fetch_interp_ident(&mut self) {
        self.td.offset = self.pos as u32;
        if let Some(top) = self.interp.last_mut() {
            top.mode = InterpMode::Part;
        }
        match self.ch() {
            Some('_') if !self.ch_at(1).map_or(false, is_identifier_part) => {
                self.pos += 1;
                self.td.kind = TokenKind::Underscore;
            }
            Some(c) if is_identifier_start(c) => {
                let start = self.pos;
                self.pos += 1;
                while self.ch().map_or(false, is_identifier_part) {
                    self.pos += 1;
                }
                let text: String = self.text[start..self.pos].iter().collect();
                if text == "this" {
                    self.td.kind = TokenKind::This;
                } else {
                    self.td.name = Some(self.names.term(&text));
                    self.td.kind = TokenKind::Ident;
                }
            }
            _ => {
                self.error_at(self.pos as u32, &messages::ERROR_IN_INTERPOLATED_STRING, &[]);
                self.td.kind = TokenKind::Unknown;
            }
        }
    }
}

/// Identifier start: a Unicode XID start character, `_`, or `$`.
fn is_identifier_start(ch: char) -> bool {
    ch == '_' || ch == '$' || unicode_xid::UnicodeXID::is_xid_start(ch)
}

/// Identifier continuation: XID continue or `$`.
fn is_identifier_part(ch: char) -> bool {
    ch == '$' || unicode_xid::UnicodeXID::is_xid_continue(ch)
}

/// Operator characters, the ASCII set.
fn is_operator_char(ch: char) -> bool {
    matches!(
        ch,
        '!' | '#' | '%' | '&' | '*' | '+' | '-' | '/' | ':' | '<' | '=' | '>' | '?' | '@'
            | '\\' | '^' | '|' | '~'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let names = Names::new();
        let mut scanner = Scanner::new(&names, source);
        let mut out = Vec::new();
        while scanner.token() != Eof {
            out.push(scanner.token());
            scanner.next_token();
        }
        out
    }

    #[test]
    fn test_punctuation_vs_operators() {
        assert_eq!(kinds("= => <- <: >: <% # @ :"), vec![
            Eq, Arrow, LArrow, Subtype, Supertype, ViewBound, Hash, At, Colon
        ]);
        // Longer runs are plain operator identifiers
        assert_eq!(kinds("== ::: <= |"), vec![Ident, Ident, Ident, Ident]);
    }

    #[test]
    fn test_underscore_star_splits() {
        assert_eq!(kinds("_*"), vec![Underscore, Ident]);
        assert_eq!(kinds("_foo"), vec![Ident]);
        assert_eq!(kinds("foo_+"), vec![Ident]);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(kinds("forSome macro lazy"), vec![ForSome, Macro, Lazy]);
    }

    #[test]
    fn test_newline_insertion() {
        // `val x = 1 \n val y = 2` separates the two statements
        assert_eq!(
            kinds("val x = 1\nval y = 2"),
            vec![Val, Ident, Eq, IntLit, NewLine, Val, Ident, Eq, IntLit]
        );
    }

    #[test]
    fn test_no_newline_inside_parens() {
        assert_eq!(kinds("f(a,\nb)"), vec![Ident, LParen, Ident, Comma, Ident, RParen]);
    }

    #[test]
    fn test_newline_after_trailing_operator() {
        // The separator is inserted; the parser consumes it when the next
        // token can start an expression.
        assert_eq!(kinds("a +\nb"), vec![Ident, Ident, NewLine, Ident]);
    }

    #[test]
    fn test_no_newline_after_dot() {
        assert_eq!(kinds("a.\nb"), vec![Ident, Dot, Ident]);
    }

    #[test]
    fn test_blank_line_gives_newlines() {
        assert_eq!(kinds("a\n\nb"), vec![Ident, NewLines, Ident]);
    }

    #[test]
    fn test_interpolated_string() {
        let names = Names::new();
        let mut s = Scanner::new(&names, r#"s"a $x b""#);
        assert_eq!(s.token(), InterpolationId);
        s.next_token();
        assert_eq!(s.token(), StringPart);
        assert_eq!(s.str_val(), "a ");
        s.next_token();
        assert_eq!(s.token(), Ident);
        s.next_token();
        assert_eq!(s.token(), StringLit);
        assert_eq!(s.str_val(), " b");
        s.next_token();
        assert_eq!(s.token(), Eof);
    }

    #[test]
    fn test_interpolated_block() {
        assert_eq!(
            kinds(r#"s"n=${a + b}!""#),
            vec![InterpolationId, StringPart, LBrace, Ident, Ident, Ident, RBrace, StringLit]
        );
    }

    #[test]
    fn test_save_restore() {
        let names = Names::new();
        let mut s = Scanner::new(&names, "a.b.c");
        let state = s.save_state();
        s.next_token();
        s.next_token();
        assert_eq!(s.token(), Ident);
        s.restore_state(state);
        assert_eq!(s.token(), Ident);
        assert_eq!(s.offset(), 0);
    }

    #[test]
    fn test_paren_balance() {
        let names = Names::new();
        let mut s = Scanner::new(&names, "((a)");
        while s.token() != Eof {
            s.next_token();
        }
        assert_eq!(s.paren_balance(RParen), -1);
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            kinds("1 2L 1.5 1.5f 3d 0xff 'c' \"s\" 'sym true null"),
            vec![IntLit, LongLit, DoubleLit, FloatLit, DoubleLit, IntLit, CharLit,
                 StringLit, SymbolLit, True, Null]
        );
    }

    #[test]
    fn test_nested_comment() {
        assert_eq!(kinds("a /* x /* y */ z */ b"), vec![Ident, Ident]);
    }

    #[test]
    fn test_triple_quoted_string() {
        let names = Names::new();
        let s = "\"\"\"line1\nline2\"\"\"";
        let mut scanner = Scanner::new(&names, s);
        assert_eq!(scanner.token(), StringLit);
        assert!(scanner.str_val().contains("line1"));
    }
}
