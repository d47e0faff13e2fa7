//! The Fjord parser.
//!
//! A hand-written recursive descent parser over the scanner's token
//! stream. The grammar is ambiguous at the token level (the same prefix
//! can begin an expression, a pattern, a type, or a parameter list), so
//! disambiguation is context-driven, with single-token lookahead and
//! speculative scanning where one token is not enough.
//!
//! Infix operators are user-definable; precedence and associativity come
//! from the operator spelling, resolved with an explicit operator stack
//! shared by expression and pattern parsing.

use bumpalo::Bump;
use fjord_ast::modifiers::{ModFlags, Modifiers};
use fjord_ast::name::{Name, Names};
use fjord_ast::tree::{Constant, ImportSelector, Tree, TreeKind};
use fjord_core::intern::Symbol;
use fjord_core::text::TextRange;
use fjord_diagnostics::{messages, Diagnostic, DiagnosticCollection, DiagnosticMessage};
use fjord_scanner::{Scanner, TokenKind};

use crate::precedence::OpInfo;
use crate::treebuilder::{Enumerator, ForBody, TreeBuilder};
use crate::ParserOptions;

/// Where an expression occurs; selects the follow-set and which trailing
/// forms are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Local,
    InBlock,
    InTemplate,
}

/// Associativity position while chaining infix types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfixMode {
    FirstOp,
    LeftOp,
    RightOp,
}

/// Pattern-context parameters: whether `_*` is accepted and which close
/// delimiter ends a sequence position.
#[derive(Debug, Clone, Copy)]
struct PatCtx {
    seq_ok: bool,
    is_xml: bool,
}

const NO_SEQ: PatCtx = PatCtx { seq_ok: false, is_xml: false };
const SEQ_OK: PatCtx = PatCtx { seq_ok: true, is_xml: false };

/// The parser. One instance parses one compilation unit.
pub struct Parser<'a> {
    names: &'a Names,
    scanner: Scanner<'a>,
    b: TreeBuilder<'a>,
    file_name: String,
    options: ParserOptions,
    diagnostics: DiagnosticCollection,

    /// Pending infix operators, shared by expression and pattern parsing.
    opstack: Vec<OpInfo<'a>>,
    /// Synthetic parameters for `_` placeholders, innermost last.
    placeholder_params: Vec<Tree<'a>>,
    /// Synthetic type parameters for `_` wildcard types, innermost last.
    placeholder_types: Vec<Tree<'a>>,
    in_fun_return_type: bool,
    /// Pattern-mode type parsing: lowercase type idents and `_` become
    /// type-variable binders.
    in_pattern_type: bool,
    /// Context bounds of the enclosing class, fed into auxiliary
    /// constructors as evidence arguments.
    class_context_bounds: Vec<&'a Tree<'a>>,
    /// Cascade suppression: errors at or before this offset are dropped.
    last_error_offset: i64,
    /// Whether the unit is directly inside the root language package
    /// (affects the primitive value-class templates).
    in_root_package: bool,
    current_package: String,
    /// Closing delimiters assumed (not present) during recovery, per
    /// `)`, `]`, `}`.
    assumed_closing: [i32; 3],
}

fn closing_index(kind: TokenKind) -> Option<usize> {
    match kind {
        TokenKind::RParen => Some(0),
        TokenKind::RBracket => Some(1),
        TokenKind::RBrace => Some(2),
        _ => None,
    }
}

impl<'a> Parser<'a> {
    pub fn new(
        arena: &'a Bump,
        names: &'a Names,
        file_name: &str,
        source: &str,
        options: ParserOptions,
    ) -> Self {
        Self {
            names,
            scanner: Scanner::new(names, source),
            b: TreeBuilder::new(arena, names),
            file_name: file_name.to_string(),
            options,
            diagnostics: DiagnosticCollection::new(),
            opstack: Vec::new(),
            placeholder_params: Vec::new(),
            placeholder_types: Vec::new(),
            in_fun_return_type: false,
            in_pattern_type: false,
            class_context_bounds: Vec::new(),
            last_error_offset: -1,
            in_root_package: false,
            current_package: String::new(),
            assumed_closing: [0; 3],
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Parse a full compilation unit and leave the scanner at EOF.
    pub fn parse(&mut self) -> Tree<'a> {
        let unit = self.check_no_escaping_placeholders(|p| p.compilation_unit());
        self.accept(TokenKind::Eof);
        unit
    }

    /// Parse a sequence of template statements.
    pub fn parse_stats(&mut self) -> Vec<Tree<'a>> {
        let stats = self.check_no_escaping_placeholders(|p| p.template_stats());
        self.accept(TokenKind::Eof);
        stats
    }

    /// Parse top-level statements: packagings or template statements.
    pub fn parse_stats_or_packages(&mut self) -> Vec<Tree<'a>> {
        let stats = self.check_no_escaping_placeholders(|p| p.template_or_top_stat_seq());
        self.accept(TokenKind::Eof);
        stats
    }

    /// All diagnostics: the scanner's followed by the parser's.
    pub fn take_diagnostics(mut self) -> DiagnosticCollection {
        let mut all = self.scanner.take_diagnostics();
        all.extend(self.diagnostics);
        all.sort();
        all
    }

    // ========================================================================
    // Token management
    // ========================================================================

    #[inline]
    fn token(&self) -> TokenKind {
        self.scanner.token()
    }

    #[inline]
    fn offset(&self) -> u32 {
        self.scanner.offset()
    }

    #[inline]
    fn next(&mut self) {
        self.scanner.next_token();
    }

    #[inline]
    fn skip_token(&mut self) -> u32 {
        self.scanner.skip_token()
    }

    #[inline]
    fn at(&self, kind: TokenKind) -> bool {
        self.token() == kind
    }

    /// Range from `start` to the end of the previously consumed token.
    fn r(&self, start: u32) -> TextRange {
        TextRange::new(start, self.scanner.last_offset().max(start))
    }

    fn current_name(&self) -> Name {
        self.scanner
            .name()
            .unwrap_or_else(|| self.names.term_of(self.names.std.error))
    }

    #[inline]
    fn is_ident_token(&self) -> bool {
        self.token().is_identifier()
    }

    fn is_raw_ident_of(&self, text: Symbol) -> bool {
        self.at(TokenKind::Ident) && self.scanner.name().map(|n| n.text) == Some(text)
    }

    fn is_raw_star(&self) -> bool {
        self.is_raw_ident_of(self.names.std.star)
    }

    fn is_raw_bar(&self) -> bool {
        self.is_raw_ident_of(self.names.std.bar)
    }

    #[inline]
    fn is_stat_sep(&self) -> bool {
        self.token().is_statement_separator()
    }

    fn is_stat_seq_end(&self) -> bool {
        matches!(self.token(), TokenKind::RBrace | TokenKind::Eof)
    }

    fn is_case_def_end(&self) -> bool {
        matches!(self.token(), TokenKind::RBrace | TokenKind::Case | TokenKind::Eof)
    }

    fn is_def_intro(&self) -> bool {
        self.token().is_def_intro()
    }

    fn is_dcl_intro(&self) -> bool {
        matches!(
            self.token(),
            TokenKind::Val | TokenKind::Var | TokenKind::Def | TokenKind::Type
        )
    }

    fn is_expr_intro(&self) -> bool {
        self.token().can_start_expression()
    }

    fn is_type_intro(&self) -> bool {
        self.token().can_start_type()
    }

    fn is_annotation_intro(&self) -> bool {
        self.at(TokenKind::At)
    }

    fn is_unary_op(&self) -> bool {
        if !self.at(TokenKind::Ident) {
            return false;
        }
        match self.scanner.name() {
            Some(n) => {
                let std = &self.names.std;
                n.text == std.plus || n.text == std.minus || n.text == std.tilde || n.text == std.bang
            }
            None => false,
        }
    }

    fn is_numeric_lit(&self) -> bool {
        matches!(
            self.token(),
            TokenKind::IntLit | TokenKind::LongLit | TokenKind::FloatLit | TokenKind::DoubleLit
        )
    }

    fn is_simple_expr_intro(&self) -> bool {
        self.token().is_literal()
            || matches!(
                self.token(),
                TokenKind::Ident
                    | TokenKind::BackquotedIdent
                    | TokenKind::This
                    | TokenKind::Super
                    | TokenKind::Underscore
                    | TokenKind::LParen
                    | TokenKind::LBrace
                    | TokenKind::New
                    | TokenKind::XmlStart
            )
    }

    fn peek_token(&mut self) -> TokenKind {
        self.scanner.peek().kind
    }

    // ------------------------------------------------------------------
    // Newline hooks
    // ------------------------------------------------------------------

    fn newline_opt(&mut self) {
        if self.at(TokenKind::NewLine) {
            self.next();
        }
    }

    fn newlines_opt(&mut self) {
        if matches!(self.token(), TokenKind::NewLine | TokenKind::NewLines) {
            self.next();
        }
    }

    fn newline_opt_when_followed_by(&mut self, kind: TokenKind) {
        if self.at(TokenKind::NewLine) && self.peek_token() == kind {
            self.next();
        }
    }

    fn newline_opt_when_following(&mut self, pred: impl Fn(TokenKind) -> bool) {
        if self.at(TokenKind::NewLine) {
            let ahead = self.peek_token();
            if pred(ahead) {
                self.next();
            }
        }
    }

    // ------------------------------------------------------------------
    // Speculative lookahead
    // ------------------------------------------------------------------

    /// Advance one token, run `f`, and roll everything back.
    fn looking_ahead<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let state = self.scanner.save_state();
        let saved_error = self.last_error_offset;
        let saved_diags = self.diagnostics.len();
        self.next();
        let result = f(self);
        self.scanner.restore_state(state);
        self.last_error_offset = saved_error;
        self.truncate_diagnostics(saved_diags);
        result
    }

    /// Advance one token and run `f`; keep the consumed tokens when `f`
    /// produces a tree, roll back when it declines.
    fn peeking_ahead(&mut self, f: impl FnOnce(&mut Self) -> Option<Tree<'a>>) -> Option<Tree<'a>> {
        let state = self.scanner.save_state();
        let saved_error = self.last_error_offset;
        let saved_diags = self.diagnostics.len();
        self.next();
        match f(self) {
            Some(tree) => Some(tree),
            None => {
                self.scanner.restore_state(state);
                self.last_error_offset = saved_error;
                self.truncate_diagnostics(saved_diags);
                None
            }
        }
    }

    fn truncate_diagnostics(&mut self, len: usize) {
        if self.diagnostics.len() > len {
            let mut kept = DiagnosticCollection::new();
            for d in self.diagnostics.diagnostics().iter().take(len) {
                kept.add(d.clone());
            }
            self.diagnostics = kept;
        }
    }

    // ========================================================================
    // Error reporting and recovery
    // ========================================================================

    fn report(&mut self, offset: u32, message: &DiagnosticMessage, args: &[&str]) {
        self.diagnostics
            .add(Diagnostic::report(message, args).in_file(&self.file_name).at_offset(offset));
    }

    fn warning(&mut self, offset: u32, message: &DiagnosticMessage, args: &[&str]) {
        self.report(offset, message, args);
    }

    fn deprecation_warning(&mut self, offset: u32, message: &DiagnosticMessage, args: &[&str]) {
        if self.options.future {
            self.report(offset, message, args);
        }
    }

    /// Report a syntax error, deduplicated by offset; optionally skip
    /// ahead to a statement boundary.
    fn syntax_error(&mut self, offset: u32, message: &DiagnosticMessage, args: &[&str], skip_it: bool) {
        if (offset as i64) > self.last_error_offset {
            self.report(offset, message, args);
            self.last_error_offset = self.offset() as i64;
        }
        if skip_it {
            self.skip(TokenKind::Unknown);
        }
    }

    /// An error at EOF is marked incomplete so drivers can tell
    /// "truncated" from "broken".
    fn incomplete_input_error(&mut self, message: &DiagnosticMessage, args: &[&str]) {
        let offset = self.offset();
        if (offset as i64) > self.last_error_offset {
            self.diagnostics.add(
                Diagnostic::report(message, args)
                    .in_file(&self.file_name)
                    .at_offset(offset)
                    .as_incomplete(),
            );
            self.last_error_offset = offset as i64;
        }
    }

    fn syntax_error_or_incomplete(&mut self, message: &DiagnosticMessage, args: &[&str], skip_it: bool) {
        if self.at(TokenKind::Eof) {
            self.incomplete_input_error(message, args);
        } else {
            self.syntax_error(self.offset(), message, args, skip_it);
        }
    }

    /// Skip ahead to `target`, or to a statement separator at zero
    /// paren/brace depth. `TokenKind::Unknown` never matches and skips to
    /// the next statement boundary.
    fn skip(&mut self, target: TokenKind) {
        let mut nparens = 0i32;
        let mut nbraces = 0i32;
        loop {
            match self.token() {
                TokenKind::Eof => return,
                TokenKind::Semi | TokenKind::NewLine | TokenKind::NewLines => {
                    if nparens == 0 && nbraces == 0 {
                        return;
                    }
                }
                TokenKind::RParen => nparens -= 1,
                TokenKind::RBrace => {
                    if nbraces == 0 {
                        return;
                    }
                    nbraces -= 1;
                }
                TokenKind::LParen => nparens += 1,
                TokenKind::LBrace => nbraces += 1,
                _ => {}
            }
            if self.token() == target && nparens == 0 && nbraces == 0 {
                return;
            }
            self.next();
        }
    }

    /// Consume the expected token or report and recover. A missing
    /// closing delimiter whose opener is also missing is "assumed": the
    /// counter is bumped and nothing is skipped.
    fn accept(&mut self, kind: TokenKind) -> u32 {
        let offset = self.offset();
        if self.token() != kind {
            let found = self.token();
            self.syntax_error_or_incomplete(
                &messages::EXPECTED_BUT_FOUND,
                &[kind.describe(), found.describe()],
                false,
            );
            match closing_index(kind) {
                Some(i) => {
                    if self.scanner.paren_balance(kind) + self.assumed_closing[i] < 0 {
                        self.assumed_closing[i] += 1;
                    } else {
                        self.skip(kind);
                    }
                }
                None => self.skip(kind),
            }
        }
        if self.token() == kind {
            self.next();
        }
        offset
    }

    fn accept_stat_sep(&mut self) {
        if self.is_stat_sep() {
            self.next();
        } else {
            self.accept(TokenKind::Semi);
        }
    }

    fn accept_stat_sep_opt(&mut self) {
        if !self.is_stat_seq_end() {
            self.accept_stat_sep();
        }
    }

    fn error_term_tree(&self) -> Tree<'a> {
        self.b.error_tree(self.offset())
    }

    fn error_pattern_tree(&self) -> Tree<'a> {
        self.b.error_tree(self.offset())
    }

    fn error_type_tree(&self) -> Tree<'a> {
        self.b.error_tree(self.offset())
    }

    // ========================================================================
    // Grouping helpers
    // ========================================================================

    fn in_parens<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.accept(TokenKind::LParen);
        let result = f(self);
        self.accept(TokenKind::RParen);
        result
    }

    fn in_braces<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.accept(TokenKind::LBrace);
        let result = f(self);
        self.accept(TokenKind::RBrace);
        result
    }

    fn in_brackets<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.accept(TokenKind::LBracket);
        let result = f(self);
        self.accept(TokenKind::RBracket);
        result
    }

    fn comma_separated<T>(&mut self, mut f: impl FnMut(&mut Self) -> T) -> Vec<T> {
        let mut items = vec![f(self)];
        while self.at(TokenKind::Comma) {
            self.next();
            items.push(f(self));
        }
        items
    }

    // ========================================================================
    // Placeholder tracker
    // ========================================================================

    /// A placeholder boundary: if the enclosed parse collected `_`
    /// parameters and the result is not itself the bare placeholder, wrap
    /// it into a function literal. With `is_any`, untyped placeholder
    /// parameters are ascribed the top type (string interpolation bodies).
    fn with_placeholders(&mut self, is_any: bool, f: impl FnOnce(&mut Self) -> Tree<'a>) -> Tree<'a> {
        let saved = std::mem::take(&mut self.placeholder_params);
        let mut result = f(self);
        if !self.placeholder_params.is_empty() && !self.is_wildcard_result(&result) {
            let mut params = std::mem::take(&mut self.placeholder_params);
            if is_any {
                for p in params.iter_mut() {
                    if let TreeKind::ValDef { mods, name, tpt, rhs } = p.kind {
                        if tpt.is_empty() {
                            let any = self.b.alloc(self.b.ident(
                                TextRange::empty(p.range.pos),
                                self.names.type_of(self.names.std.any),
                            ));
                            *p = Tree::new(p.range, TreeKind::ValDef { mods, name, tpt: any, rhs });
                        }
                    }
                }
            }
            let range = result.range;
            let params = self.b.alloc_list(params);
            result = Tree::new(range, TreeKind::Function { params, body: self.b.alloc(result) });
        }
        let mut merged = saved;
        merged.append(&mut self.placeholder_params);
        self.placeholder_params = merged;
        result
    }

    /// Whether the boundary result is exactly the most recent placeholder
    /// (possibly under ascriptions), meaning the placeholder belongs to
    /// an enclosing boundary.
    fn is_wildcard_result(&self, t: &Tree<'a>) -> bool {
        match t.kind {
            TreeKind::Ident(name) => self.placeholder_params.last().map_or(false, |p| {
                matches!(p.kind, TreeKind::ValDef { name: pname, .. } if pname == name)
            }),
            TreeKind::Typed { expr, .. } => self.is_wildcard_result(expr),
            TreeKind::Annotated { arg, .. } => self.is_wildcard_result(arg),
            _ => false,
        }
    }

    /// `_` in expression position: a fresh synthetic parameter.
    fn fresh_placeholder(&mut self) -> Tree<'a> {
        let start = self.offset();
        let pname = self.names.fresh_term_name("x$");
        self.next();
        let id = self.b.ident(self.r(start), pname);
        let param = self.b.mk_synthetic_param(start, pname);
        self.placeholder_params.push(param);
        id
    }

    /// Attach an ascription to the pending placeholder behind `_: T`.
    fn ascribe_placeholder(&mut self, tpt: &'a Tree<'a>) {
        if let Some(p) = self.placeholder_params.last_mut() {
            if let TreeKind::ValDef { mods, name, rhs, .. } = p.kind {
                *p = Tree::new(p.range, TreeKind::ValDef { mods, name, tpt, rhs });
            }
        }
    }

    /// Remove a placeholder parameter that was converted to an explicit
    /// lambda parameter.
    fn remove_as_placeholder(&mut self, name: Name) {
        self.placeholder_params.retain(|p| {
            !matches!(p.kind, TreeKind::ValDef { name: pname, .. } if pname == name)
        });
    }

    /// Top-level boundaries reject escaped placeholders.
    fn check_no_escaping_placeholders<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved_params = std::mem::take(&mut self.placeholder_params);
        let saved_types = std::mem::take(&mut self.placeholder_types);
        let result = f(self);
        if let Some(p) = self.placeholder_params.first() {
            let pos = p.range.pos;
            self.syntax_error(pos, &messages::UNBOUND_PLACEHOLDER_PARAMETER, &[], false);
        }
        if let Some(t) = self.placeholder_types.first() {
            let pos = t.range.pos;
            self.syntax_error(pos, &messages::WILDCARD_NOT_ALLOWED_HERE, &[], false);
        }
        self.placeholder_params = saved_params;
        self.placeholder_types = saved_types;
        result
    }

    /// A wildcard-type boundary: placeholder type parameters bind to the
    /// nearest enclosing applied type as an existential.
    fn placeholder_type_boundary(&mut self, f: impl FnOnce(&mut Self) -> Tree<'a>) -> Tree<'a> {
        let saved = std::mem::take(&mut self.placeholder_types);
        let mut t = f(self);
        if !self.placeholder_types.is_empty() && matches!(t.kind, TreeKind::AppliedType { .. }) {
            let params = std::mem::take(&mut self.placeholder_types);
            let range = t.range;
            let tpt = self.b.alloc(t);
            let wheres = self.b.alloc_list(params);
            t = Tree::new(range, TreeKind::ExistentialType { tpt, wheres });
        }
        let mut merged = saved;
        merged.append(&mut self.placeholder_types);
        self.placeholder_types = merged;
        t
    }

    /// `_` in type position: a fresh existential type parameter with
    /// optional bounds.
    fn wildcard_type(&mut self, start: u32) -> Tree<'a> {
        let pname = self.names.fresh_type_name("_$");
        let t = self.b.ident(self.r(start), pname);
        let bounds = self.type_bounds();
        let param = self
            .b
            .mk_synthetic_type_param(t.range.union(bounds.range), pname, bounds);
        self.placeholder_types.push(param);
        t
    }

    // ========================================================================
    // Identifiers and paths
    // ========================================================================

    fn ident(&mut self) -> Name {
        if self.is_ident_token() {
            let name = self.current_name();
            self.next();
            name
        } else {
            self.syntax_error_or_incomplete(&messages::IDENTIFIER_EXPECTED, &[], true);
            self.names.term_of(self.names.std.error)
        }
    }

    fn ident_for_type(&mut self) -> Name {
        self.ident().to_type()
    }

    fn wildcard_or_ident(&mut self) -> Name {
        if self.at(TokenKind::Underscore) {
            self.next();
            self.names.wildcard()
        } else {
            self.ident()
        }
    }

    /// `Path ::= StableId | [id .] this [. selectors]` — also covers
    /// `super` prefixes. With `type_ok`, a trailing `.type` produces a
    /// singleton type.
    fn path(&mut self, this_ok: bool, type_ok: bool) -> Tree<'a> {
        let start = self.offset();
        if self.at(TokenKind::This) {
            self.next();
            let mut t = self.b.at(self.r(start), TreeKind::This(self.names.type_of(self.names.std.empty)));
            if !this_ok || self.at(TokenKind::Dot) {
                self.accept(TokenKind::Dot);
                t = self.selectors(t, type_ok, start);
            }
            t
        } else if self.at(TokenKind::Super) {
            self.next();
            let mix = self.mixin_qualifier_opt();
            let mut t = self.b.at(
                self.r(start),
                TreeKind::Super { qual: self.names.type_of(self.names.std.empty), mix },
            );
            self.accept(TokenKind::Dot);
            t = self.selector(t, start);
            if self.at(TokenKind::Dot) {
                self.next();
                t = self.selectors(t, type_ok, start);
            }
            t
        } else {
            let name = self.ident();
            let mut t = self.b.ident(self.r(start), name);
            if self.at(TokenKind::Dot) {
                self.next();
                if self.at(TokenKind::This) {
                    self.next();
                    t = self.b.at(self.r(start), TreeKind::This(name.to_type()));
                    if !this_ok || self.at(TokenKind::Dot) {
                        self.accept(TokenKind::Dot);
                        t = self.selectors(t, type_ok, start);
                    }
                } else if self.at(TokenKind::Super) {
                    self.next();
                    let mix = self.mixin_qualifier_opt();
                    t = self.b.at(self.r(start), TreeKind::Super { qual: name.to_type(), mix });
                    self.accept(TokenKind::Dot);
                    t = self.selector(t, start);
                    if self.at(TokenKind::Dot) {
                        self.next();
                        t = self.selectors(t, type_ok, start);
                    }
                } else {
                    t = self.selectors(t, type_ok, start);
                }
            }
            t
        }
    }

    fn selectors(&mut self, t: Tree<'a>, type_ok: bool, start: u32) -> Tree<'a> {
        if type_ok && self.at(TokenKind::Type) {
            self.next();
            let t = self.b.alloc(t);
            self.b.at(self.r(start), TreeKind::SingletonType(t))
        } else {
            let t1 = self.selector(t, start);
            if self.at(TokenKind::Dot) {
                self.next();
                self.selectors(t1, type_ok, start)
            } else {
                t1
            }
        }
    }

    fn selector(&mut self, t: Tree<'a>, start: u32) -> Tree<'a> {
        let name = self.ident();
        self.b.select(self.r(start), t, name)
    }

    fn mixin_qualifier_opt(&mut self) -> Name {
        if self.at(TokenKind::LBracket) {
            self.in_brackets(|p| p.ident_for_type())
        } else {
            self.names.type_of(self.names.std.empty)
        }
    }

    fn stable_id(&mut self) -> Tree<'a> {
        self.path(false, false)
    }

    fn qual_id(&mut self) -> Tree<'a> {
        let start = self.offset();
        let name = self.ident();
        let mut t = self.b.ident(self.r(start), name);
        while self.at(TokenKind::Dot) {
            self.next();
            t = self.selector(t, start);
        }
        t
    }
}

// ============================================================================
// Literals
// ============================================================================

impl<'a> Parser<'a> {
    fn literal(&mut self, is_negated: bool, in_pattern: bool, start: u32) -> Tree<'a> {
        if self.at(TokenKind::InterpolationId) {
            return self.interpolated_string(in_pattern);
        }
        let value = match self.token() {
            TokenKind::CharLit => Constant::Char(self.scanner.str_val().chars().next().unwrap_or('\u{0}')),
            TokenKind::IntLit => Constant::Int(self.int_value(is_negated) as i32),
            TokenKind::LongLit => Constant::Long(self.int_value(is_negated)),
            TokenKind::FloatLit => {
                let v: f32 = self.scanner.str_val().parse().unwrap_or(0.0);
                Constant::Float(if is_negated { -v } else { v })
            }
            TokenKind::DoubleLit => {
                let v: f64 = self.scanner.str_val().parse().unwrap_or(0.0);
                Constant::Double(if is_negated { -v } else { v })
            }
            TokenKind::StringLit | TokenKind::StringPart => {
                Constant::String(self.scanner.str_val().to_string())
            }
            TokenKind::SymbolLit => Constant::Symbol(self.current_name()),
            TokenKind::True => Constant::Boolean(true),
            TokenKind::False => Constant::Boolean(false),
            TokenKind::Null => Constant::Null,
            _ => {
                self.syntax_error_or_incomplete(&messages::ILLEGAL_START_OF_SIMPLE_EXPRESSION, &[], true);
                return self.error_term_tree();
            }
        };
        self.next();
        self.b.at(self.r(start), TreeKind::Literal(value))
    }

    fn int_value(&mut self, is_negated: bool) -> i64 {
        let base = self.scanner.base();
        let text = self.scanner.str_val().to_string();
        match i64::from_str_radix(&text, base) {
            Ok(v) => {
                if is_negated {
                    -v
                } else {
                    v
                }
            }
            Err(_) => {
                let offset = self.offset();
                self.syntax_error(offset, &messages::INTEGER_NUMBER_TOO_LARGE, &[], false);
                0
            }
        }
    }

    /// `id"part${expr}part"` desugars to
    /// `StringContext(parts...).id(exprs...)`. Bare `_` inside an
    /// interpolation body is a placeholder typed as the top type.
    fn interpolated_string(&mut self, in_pattern: bool) -> Tree<'a> {
        let start = self.offset();
        let interpolator = self.current_name();
        let mut parts = Vec::new();
        let mut exprs = Vec::new();
        self.next();
        while self.at(TokenKind::StringPart) {
            let pstart = self.offset();
            parts.push(self.literal(false, in_pattern, pstart));
            let embedded = if in_pattern {
                match self.token() {
                    TokenKind::LBrace => self.in_braces(|p| p.pattern(NO_SEQ)),
                    TokenKind::Ident | TokenKind::BackquotedIdent => {
                        let estart = self.offset();
                        let name = self.ident();
                        self.b.ident(self.r(estart), name)
                    }
                    _ => {
                        self.syntax_error_or_incomplete(&messages::ERROR_IN_INTERPOLATED_STRING, &[], false);
                        self.error_pattern_tree()
                    }
                }
            } else {
                match self.token() {
                    TokenKind::Ident | TokenKind::BackquotedIdent => {
                        let estart = self.offset();
                        let name = self.ident();
                        self.b.ident(self.r(estart), name)
                    }
                    TokenKind::This => {
                        let estart = self.skip_token();
                        self.b
                            .at(self.r(estart), TreeKind::This(self.names.type_of(self.names.std.empty)))
                    }
                    TokenKind::Underscore => self.with_placeholders(true, |p| p.fresh_placeholder()),
                    TokenKind::LBrace => self.with_placeholders(true, |p| p.block_expr()),
                    _ => {
                        self.syntax_error_or_incomplete(&messages::ERROR_IN_INTERPOLATED_STRING, &[], false);
                        self.error_term_tree()
                    }
                }
            };
            exprs.push(embedded);
        }
        if self.at(TokenKind::StringLit) {
            let pstart = self.offset();
            parts.push(self.literal(false, in_pattern, pstart));
        }
        let range = self.r(start);
        let context_fn = self.b.ident(
            TextRange::empty(start),
            self.names.term_of(self.names.std.string_context),
        );
        let context = self.b.apply(range, context_fn, parts);
        let sel = self.b.select(range, context, interpolator);
        self.b.apply(range, sel, exprs)
    }
}

// ============================================================================
// Types
// ============================================================================

impl<'a> Parser<'a> {
    /// `Type ::= InfixType [=> Type | forSome Refinement]`, with the
    /// parenthesised prefix handled by `tuple_infix_type`.
    fn typ(&mut self) -> Tree<'a> {
        self.placeholder_type_boundary(|p| {
            let start = p.offset();
            let t = if p.at(TokenKind::LParen) {
                p.tuple_infix_type(start)
            } else {
                p.infix_type(InfixMode::FirstOp)
            };
            match p.token() {
                TokenKind::Arrow => {
                    p.next();
                    let result = p.typ();
                    p.b.mk_function_type(p.r(start), vec![t], result)
                }
                TokenKind::ForSome => {
                    p.next();
                    p.make_existential(start, t)
                }
                _ => t,
            }
        })
    }

    /// Disambiguate `(T1, ..., Tn)` from `(T1, ..., Tn) => R`: consume
    /// the parens, then decide on the arrow. A tuple continues with the
    /// infix-type tail.
    fn tuple_infix_type(&mut self, start: u32) -> Tree<'a> {
        self.next();
        if self.at(TokenKind::RParen) {
            self.next();
            self.accept(TokenKind::Arrow);
            let result = self.typ();
            return self.b.mk_function_type(self.r(start), vec![], result);
        }
        let ts = self.comma_separated(|p| p.function_arg_type());
        self.accept(TokenKind::RParen);
        if self.at(TokenKind::Arrow) {
            self.next();
            let result = self.typ();
            self.b.mk_function_type(self.r(start), ts, result)
        } else {
            for t in &ts {
                self.check_not_by_name_or_varargs(t);
            }
            let tuple = self.b.mk_tuple_type(self.r(start), ts);
            let t = self.simple_type_rest(tuple, start);
            let t = self.annot_type_rest(t, start);
            let t = self.compound_type_rest(t, start);
            self.infix_type_rest(t, InfixMode::FirstOp, start)
        }
    }

    /// By-name and repeated markers are only parameter types.
    fn check_not_by_name_or_varargs(&mut self, t: &Tree<'a>) {
        if let TreeKind::AppliedType { tpt, .. } = t.kind {
            if let TreeKind::Ident(name) = tpt.kind {
                if name.text == self.names.std.byname {
                    self.syntax_error(t.range.pos, &messages::BY_NAME_TYPE_POSITION, &[], false);
                } else if name.text == self.names.std.repeated {
                    self.syntax_error(t.range.pos, &messages::REPEATED_TYPE_POSITION, &[], false);
                }
            }
        }
    }

    /// `T forSome { type X; val x: T }`.
    fn make_existential(&mut self, start: u32, t: Tree<'a>) -> Tree<'a> {
        let stats = self.refinement();
        let mut wheres = Vec::new();
        for stat in stats {
            let keep = match &stat.kind {
                TreeKind::TypeDef { rhs, .. } => matches!(rhs.kind, TreeKind::TypeBounds { .. }),
                TreeKind::ValDef { rhs, .. } => rhs.is_empty(),
                TreeKind::Empty | TreeKind::Error => continue,
                _ => false,
            };
            if keep {
                wheres.push(stat);
            } else {
                self.syntax_error(stat.range.pos, &messages::ILLEGAL_START_OF_DECLARATION, &[], false);
            }
        }
        let range = self.r(start);
        let tpt = self.b.alloc(t);
        let wheres = self.b.alloc_list(wheres);
        self.b.at(range, TreeKind::ExistentialType { tpt, wheres })
    }

    fn infix_type(&mut self, mode: InfixMode) -> Tree<'a> {
        self.placeholder_type_boundary(|p| {
            let start = p.offset();
            let t = p.compound_type(start);
            p.infix_type_rest(t, mode, start)
        })
    }

    fn start_infix_type(&mut self) -> Tree<'a> {
        self.infix_type(InfixMode::FirstOp)
    }

    /// `InfixType ::= CompoundType {id [nl] CompoundType}`. Type
    /// operators associate by their spelling; mixing directions without
    /// parentheses is rejected.
    fn infix_type_rest(&mut self, t: Tree<'a>, mode: InfixMode, start: u32) -> Tree<'a> {
        // A trailing `*` ends the type when it is the repeated-parameter
        // marker; leave it for paramType.
        if self.is_raw_star() {
            let is_param_close = self.looking_ahead(|p| {
                matches!(
                    p.token(),
                    TokenKind::RParen | TokenKind::Comma | TokenKind::Eq | TokenKind::RBrace
                )
            });
            if is_param_close {
                return t;
            }
        }
        if !self.is_ident_token() {
            return t;
        }
        let op_offset = self.offset();
        let op_name = self.current_name();
        let left_assoc = !self.names.is_right_assoc(op_name);
        if mode != InfixMode::FirstOp {
            self.check_assoc(op_offset, op_name, mode == InfixMode::LeftOp);
        }
        let tycon = self.b.ident(TextRange::new(op_offset, op_offset + 1), op_name.to_type());
        self.ident();
        self.newline_opt_when_following(|k| k.can_start_type());
        if left_assoc {
            let rhs = self.compound_type(self.offset());
            let tpt = self.b.alloc(tycon);
            let args = self.b.alloc_list(vec![t, rhs]);
            let applied = self.b.at(self.r(start), TreeKind::AppliedType { tpt, args });
            self.infix_type_rest(applied, InfixMode::LeftOp, start)
        } else {
            let rhs = self.infix_type(InfixMode::RightOp);
            let tpt = self.b.alloc(tycon);
            let args = self.b.alloc_list(vec![t, rhs]);
            self.b.at(self.r(start), TreeKind::AppliedType { tpt, args })
        }
    }

    fn check_assoc(&mut self, offset: u32, op: Name, left_assoc: bool) {
        if self.names.is_right_assoc(op) == left_assoc {
            self.syntax_error(offset, &messages::MIXED_ASSOCIATIVITY, &[], false);
        }
    }

    /// `CompoundType ::= AnnotType {with AnnotType} [Refinement]`.
    fn compound_type(&mut self, start: u32) -> Tree<'a> {
        let t = if self.at(TokenKind::LBrace) {
            self.b.ident(
                TextRange::empty(self.offset()),
                self.names.type_of(self.names.std.any_ref),
            )
        } else {
            self.annot_type(start)
        };
        self.compound_type_rest(t, start)
    }

    fn compound_type_rest(&mut self, t: Tree<'a>, start: u32) -> Tree<'a> {
        let mut parents = vec![t];
        while self.at(TokenKind::With) {
            self.next();
            let astart = self.offset();
            parents.push(self.annot_type(astart));
        }
        self.newline_opt_when_followed_by(TokenKind::LBrace);
        let has_refinement = self.at(TokenKind::LBrace);
        let refinements = if has_refinement { self.refinement() } else { Vec::new() };
        if parents.len() == 1 && !has_refinement {
            return parents.pop().unwrap();
        }
        let range = self.r(start);
        let parents = self.b.alloc_list(parents);
        let refinement = self.b.alloc_list(refinements);
        self.b.at(range, TreeKind::CompoundType { parents, refinement })
    }

    /// `AnnotType ::= SimpleType {Annotation}`.
    fn annot_type(&mut self, start: u32) -> Tree<'a> {
        self.placeholder_type_boundary(|p| {
            let t = p.simple_type(start);
            p.annot_type_rest(t, start)
        })
    }

    fn annot_type_rest(&mut self, t: Tree<'a>, start: u32) -> Tree<'a> {
        let mut result = t;
        while self.is_annotation_intro() {
            let annots = self.annotations(false);
            for annot in annots {
                let range = self.r(start);
                let annot = self.b.alloc(annot);
                let arg = self.b.alloc(result);
                result = self.b.at(range, TreeKind::Annotated { annot, arg });
            }
        }
        result
    }

    /// `SimpleType ::= ( Types ) | _ TypeBounds | Path .type | StableId
    ///               | SimpleType TypeArgs | SimpleType # id`.
    fn simple_type(&mut self, start: u32) -> Tree<'a> {
        let t = match self.token() {
            TokenKind::LParen => {
                let ts = self.in_parens(|p| p.types());
                self.b.mk_tuple_type(self.r(start), ts)
            }
            TokenKind::Underscore => {
                let ustart = self.skip_token();
                self.wildcard_type(ustart)
            }
            _ => {
                let path = self.path(false, true);
                match path.kind {
                    TreeKind::SingletonType(_) => path,
                    _ => self.b.convert_to_type_id(path),
                }
            }
        };
        self.simple_type_rest(t, start)
    }

    fn simple_type_rest(&mut self, t: Tree<'a>, start: u32) -> Tree<'a> {
        match self.token() {
            TokenKind::Hash => {
                self.next();
                let name = self.ident_for_type();
                let range = self.r(start);
                let qualifier = self.b.alloc(t);
                let projected = self.b.at(range, TreeKind::SelectFromType { qualifier, name });
                self.simple_type_rest(projected, start)
            }
            TokenKind::LBracket => {
                let args = self.type_args();
                let range = self.r(start);
                let tpt = self.b.alloc(t);
                let args = self.b.alloc_list(args);
                let applied = self.b.at(range, TreeKind::AppliedType { tpt, args });
                self.simple_type_rest(applied, start)
            }
            _ => t,
        }
    }

    fn type_args(&mut self) -> Vec<Tree<'a>> {
        self.in_brackets(|p| p.types())
    }

    fn types(&mut self) -> Vec<Tree<'a>> {
        self.comma_separated(|p| p.arg_type())
    }

    /// A type argument. In pattern context, `_` and lowercase identifiers
    /// become type-variable binders.
    fn arg_type(&mut self) -> Tree<'a> {
        let start = self.offset();
        if self.in_pattern_type {
            if self.at(TokenKind::Underscore) {
                self.next();
                if matches!(self.token(), TokenKind::Subtype | TokenKind::Supertype) {
                    return self.wildcard_type(start);
                }
                let body = self.b.alloc(Tree::empty(self.scanner.last_offset()));
                return self.b.at(
                    self.r(start),
                    TreeKind::Bind { name: self.names.wildcard().to_type(), body },
                );
            }
            let t = self.typ();
            if let TreeKind::Ident(name) = t.kind {
                if name.is_type() && self.names.starts_with_lower(name) {
                    let body = self.b.alloc(Tree::empty(t.range.end));
                    return self.b.at(t.range, TreeKind::Bind { name, body });
                }
            }
            t
        } else {
            self.typ()
        }
    }

    fn function_arg_type(&mut self) -> Tree<'a> {
        if self.in_pattern_type {
            self.arg_type()
        } else {
            self.param_type(true)
        }
    }

    /// A parameter type: `=> T` (by-name) and `T*` (repeated) are legal
    /// only here.
    fn param_type(&mut self, use_start_as_position: bool) -> Tree<'a> {
        let start = self.offset();
        match self.token() {
            TokenKind::Arrow => {
                self.next();
                let inner = self.typ();
                let tycon = self.b.alloc(self.b.ident(
                    TextRange::empty(start),
                    self.names.type_of(self.names.std.byname),
                ));
                let args = self.b.alloc_list(vec![inner]);
                self.b.at(self.r(start), TreeKind::AppliedType { tpt: tycon, args })
            }
            _ => {
                let t = self.typ();
                if self.is_raw_star() {
                    self.next();
                    let range = if use_start_as_position { self.r(start) } else { t.range };
                    let tycon = self.b.alloc(self.b.ident(
                        TextRange::empty(start),
                        self.names.type_of(self.names.std.repeated),
                    ));
                    let args = self.b.alloc_list(vec![t]);
                    self.b.at(range, TreeKind::AppliedType { tpt: tycon, args })
                } else {
                    t
                }
            }
        }
    }

    /// `TypeBounds ::= [>: Lo] [<: Hi]`.
    fn type_bounds(&mut self) -> Tree<'a> {
        let start = self.offset();
        let lo = self.bound(TokenKind::Supertype);
        let hi = self.bound(TokenKind::Subtype);
        let range = self.r(start);
        let lo = self.b.alloc(lo);
        let hi = self.b.alloc(hi);
        self.b.at(range, TreeKind::TypeBounds { lo, hi })
    }

    fn bound(&mut self, tok: TokenKind) -> Tree<'a> {
        if self.at(tok) {
            self.next();
            self.typ()
        } else {
            Tree::empty(self.offset())
        }
    }

    fn type_or_infix_type(&mut self, location: Location) -> Tree<'a> {
        if location == Location::Local {
            self.typ()
        } else {
            self.start_infix_type()
        }
    }

    /// The simple type of an annotation: a stable id plus type args.
    fn expr_simple_type(&mut self) -> Tree<'a> {
        let start = self.offset();
        self.simple_type(start)
    }

    fn typed_opt(&mut self) -> Tree<'a> {
        if self.at(TokenKind::Colon) {
            self.next();
            self.typ()
        } else {
            Tree::empty(self.offset())
        }
    }

    fn from_within_return_type(&mut self, f: impl FnOnce(&mut Self) -> Tree<'a>) -> Tree<'a> {
        let saved = self.in_fun_return_type;
        self.in_fun_return_type = true;
        let t = f(self);
        self.in_fun_return_type = saved;
        t
    }
}

// ============================================================================
// Expressions
// ============================================================================

impl<'a> Parser<'a> {
    /// Parse an expression; every call is a placeholder boundary.
    fn expr(&mut self, location: Location) -> Tree<'a> {
        self.with_placeholders(false, |p| p.expr0(location))
    }

    fn statement(&mut self, location: Location) -> Tree<'a> {
        self.expr(location)
    }

    fn expr0(&mut self, location: Location) -> Tree<'a> {
        match self.token() {
            TokenKind::If => self.parse_if(),
            TokenKind::Try => self.parse_try(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => {
                let start = self.skip_token();
                let e = if self.is_expr_intro() {
                    self.expr(Location::Local)
                } else {
                    self.b.literal_unit(self.scanner.last_offset())
                };
                let range = self.r(start);
                self.b.at(range, TreeKind::Return(self.b.alloc(e)))
            }
            TokenKind::Throw => {
                let start = self.skip_token();
                let e = self.expr(Location::Local);
                let range = self.r(start);
                self.b.at(range, TreeKind::Throw(self.b.alloc(e)))
            }
            TokenKind::Implicit => {
                let start = self.skip_token();
                self.implicit_closure(start, location)
            }
            _ => self.expr_rest(location),
        }
    }

    fn expr_rest(&mut self, location: Location) -> Tree<'a> {
        let start = self.offset();
        let mut t = self.postfix_expr();
        match self.token() {
            TokenKind::Eq => {
                // Assignment only for an assignable left-hand side; any
                // other shape silently keeps the postfix expression.
                if t.is_assignable() {
                    self.next();
                    let lhs = self.b.strip_parens(t);
                    let rhs = self.expr(Location::Local);
                    let range = self.r(start);
                    t = self.b.at(
                        range,
                        TreeKind::Assign {
                            lhs: self.b.alloc(lhs),
                            rhs: self.b.alloc(rhs),
                        },
                    );
                }
            }
            TokenKind::Colon => {
                t = self.b.strip_parens(t);
                self.next();
                if self.at(TokenKind::Underscore) {
                    // `e: _*` sequence expansion
                    let uscore = self.skip_token();
                    if self.is_raw_star() {
                        self.next();
                        let tpt = self.b.ident(
                            self.r(uscore),
                            self.names.type_of(self.names.std.wildcard_star),
                        );
                        let range = self.r(start);
                        t = self.b.at(
                            range,
                            TreeKind::Typed {
                                expr: self.b.alloc(t),
                                tpt: self.b.alloc(tpt),
                            },
                        );
                    } else {
                        self.syntax_error_or_incomplete(
                            &messages::EXPECTED_BUT_FOUND,
                            &["*", self.token().describe()],
                            true,
                        );
                    }
                } else if self.is_annotation_intro() {
                    let annots = self.annotations(false);
                    for annot in annots {
                        let range = self.r(start);
                        let annot = self.b.alloc(annot);
                        let arg = self.b.alloc(t);
                        t = self.b.at(range, TreeKind::Annotated { annot, arg });
                    }
                } else {
                    let tpt = self.type_or_infix_type(location);
                    let tpt = self.b.alloc(tpt);
                    if self.is_wildcard_result(&t) {
                        self.ascribe_placeholder(tpt);
                    }
                    let range = self.r(start);
                    t = self.b.at(range, TreeKind::Typed { expr: self.b.alloc(t), tpt });
                }
            }
            TokenKind::Match => {
                self.next();
                let mstart = self.offset();
                let cases = self.in_braces(|p| p.case_clauses());
                let selector = self.b.strip_parens(t);
                let range = self.r(start).union(self.r(mstart));
                t = self.b.at(
                    range,
                    TreeKind::Match {
                        selector: self.b.alloc(selector),
                        cases: self.b.alloc_list(cases),
                    },
                );
            }
            _ => {}
        }
        // An `=>` turns the preceding expression into an anonymous
        // function when its shape allows. In template position only a
        // parenthesised typed parameter list qualifies, so that a
        // self-type declaration is not mistaken for a lambda.
        if self.at(TokenKind::Arrow) && (location != Location::InTemplate || self.lhs_is_typed_param_list(&t)) {
            self.next();
            let params = self.convert_to_params(t);
            let body = if location != Location::InBlock {
                self.expr(Location::Local)
            } else {
                self.block()
            };
            let range = self.r(start);
            t = self.b.at(
                range,
                TreeKind::Function {
                    params: self.b.alloc_list(params),
                    body: self.b.alloc(body),
                },
            );
        }
        self.b.strip_parens(t)
    }

    fn lhs_is_typed_param_list(&self, t: &Tree<'a>) -> bool {
        match t.kind {
            TreeKind::Parens(ts) => ts.iter().all(|x| {
                matches!(x.kind, TreeKind::Typed { expr, .. } if matches!(expr.kind, TreeKind::Ident(_)))
            }),
            _ => false,
        }
    }

    fn convert_to_params(&mut self, t: Tree<'a>) -> Vec<Tree<'a>> {
        match t.kind {
            TreeKind::Parens(ts) => ts.to_vec().into_iter().map(|x| self.convert_to_param(x)).collect(),
            _ => vec![self.convert_to_param(t)],
        }
    }

    fn convert_to_param(&mut self, t: Tree<'a>) -> Tree<'a> {
        let range = t.range;
        let empty = self.b.alloc(Tree::empty(range.end));
        match t.kind {
            TreeKind::Ident(name) => {
                self.remove_as_placeholder(name);
                self.b.at(
                    range,
                    TreeKind::ValDef {
                        mods: Modifiers::with_flags(ModFlags::PARAM),
                        name,
                        tpt: empty,
                        rhs: empty,
                    },
                )
            }
            TreeKind::Typed { expr, tpt } => match expr.kind {
                TreeKind::Ident(name) => {
                    self.remove_as_placeholder(name);
                    self.b.at(
                        range,
                        TreeKind::ValDef {
                            mods: Modifiers::with_flags(ModFlags::PARAM),
                            name,
                            tpt,
                            rhs: empty,
                        },
                    )
                }
                _ => {
                    self.syntax_error(range.pos, &messages::NOT_A_LEGAL_FORMAL_PARAMETER, &[], false);
                    self.b.at(
                        range,
                        TreeKind::ValDef {
                            mods: Modifiers::with_flags(ModFlags::PARAM),
                            name: self.names.term_of(self.names.std.error),
                            tpt: empty,
                            rhs: empty,
                        },
                    )
                }
            },
            _ => {
                self.syntax_error(range.pos, &messages::NOT_A_LEGAL_FORMAL_PARAMETER, &[], false);
                self.b.at(
                    range,
                    TreeKind::ValDef {
                        mods: Modifiers::with_flags(ModFlags::PARAM),
                        name: self.names.term_of(self.names.std.error),
                        tpt: empty,
                        rhs: empty,
                    },
                )
            }
        }
    }

    fn parse_if(&mut self) -> Tree<'a> {
        let start = self.skip_token();
        let cond = self.cond_expr();
        self.newlines_opt();
        let then_part = self.expr(Location::Local);
        let else_part = if self.at(TokenKind::Else) {
            self.next();
            self.expr(Location::Local)
        } else if self.is_stat_sep() && self.peek_token() == TokenKind::Else {
            self.next();
            self.next();
            self.expr(Location::Local)
        } else {
            self.b.literal_unit(self.scanner.last_offset())
        };
        let range = self.r(start);
        self.b.at(
            range,
            TreeKind::If {
                cond: self.b.alloc(cond),
                then_part: self.b.alloc(then_part),
                else_part: self.b.alloc(else_part),
            },
        )
    }

    /// A parenthesised condition. A missing `(` reports the error and
    /// yields an error tree.
    fn cond_expr(&mut self) -> Tree<'a> {
        if self.at(TokenKind::LParen) {
            self.next();
            let cond = self.expr(Location::Local);
            self.accept(TokenKind::RParen);
            cond
        } else {
            self.accept(TokenKind::LParen);
            self.error_term_tree()
        }
    }

    fn parse_try(&mut self) -> Tree<'a> {
        let start = self.skip_token();
        let body = match self.token() {
            TokenKind::LBrace => self.in_braces(|p| p.block()),
            TokenKind::LParen => self.in_parens(|p| p.expr(Location::Local)),
            _ => self.expr(Location::Local),
        };
        let catches = if self.at(TokenKind::Catch) {
            self.next();
            if !self.at(TokenKind::LBrace) {
                let handler = self.expr(Location::Local);
                vec![self.b.make_catch_from_expr(handler)]
            } else {
                self.in_braces(|p| {
                    if p.at(TokenKind::Case) {
                        p.case_clauses()
                    } else {
                        let handler = p.expr(Location::Local);
                        vec![p.b.make_catch_from_expr(handler)]
                    }
                })
            }
        } else {
            Vec::new()
        };
        let finalizer = if self.at(TokenKind::Finally) {
            self.next();
            self.expr(Location::Local)
        } else {
            Tree::empty(self.scanner.last_offset())
        };
        let range = self.r(start);
        self.b.at(
            range,
            TreeKind::Try {
                block: self.b.alloc(body),
                catches: self.b.alloc_list(catches),
                finalizer: self.b.alloc(finalizer),
            },
        )
    }

    fn parse_while(&mut self) -> Tree<'a> {
        let start = self.skip_token();
        let label = self.names.fresh_term_name("while$");
        let cond = self.cond_expr();
        self.newlines_opt();
        let body = self.expr(Location::Local);
        self.b.make_while(self.r(start), label, cond, body)
    }

    fn parse_do(&mut self) -> Tree<'a> {
        let start = self.skip_token();
        let label = self.names.fresh_term_name("doWhile$");
        let body = self.expr(Location::Local);
        if self.is_stat_sep() {
            self.next();
        }
        self.accept(TokenKind::While);
        let cond = self.cond_expr();
        self.b.make_do_while(self.r(start), label, body, cond)
    }

    fn parse_for(&mut self) -> Tree<'a> {
        let start = self.skip_token();
        let enums = if self.at(TokenKind::LBrace) {
            self.in_braces(|p| p.enumerators())
        } else {
            self.in_parens(|p| p.enumerators())
        };
        self.newlines_opt();
        let body = if self.at(TokenKind::Yield) {
            self.next();
            ForBody::Yield(self.expr(Location::Local))
        } else {
            ForBody::NoYield(self.expr(Location::Local))
        };
        let mut t = self.b.mk_for(enums, body);
        t.range = self.r(start);
        t
    }

    // ------------------------------------------------------------------
    // Enumerators
    // ------------------------------------------------------------------

    fn enumerators(&mut self) -> Vec<Enumerator<'a>> {
        let mut enums = Vec::new();
        self.enumerator(true, &mut enums);
        while self.is_stat_sep() {
            self.next();
            self.enumerator(false, &mut enums);
        }
        enums
    }

    fn enumerator(&mut self, is_first: bool, out: &mut Vec<Enumerator<'a>>) {
        if self.at(TokenKind::If) && !is_first {
            let test = self.guard();
            out.push(self.b.mk_filter(test));
        } else {
            self.generator(!is_first, out);
        }
    }

    /// `Generator ::= [val] Pattern1 (<- | =) Expr {Guard}`. The first
    /// enumerator must be a true generator; `=` assignments are only
    /// legal afterwards. The `val` prefix is accepted but deprecated.
    fn generator(&mut self, eq_ok: bool, out: &mut Vec<Enumerator<'a>>) {
        let has_val = self.at(TokenKind::Val);
        if has_val {
            self.next();
        }
        let pat = self.pattern1(NO_SEQ);
        let has_eq = self.at(TokenKind::Eq);
        if has_val {
            let offset = self.offset();
            if has_eq {
                self.deprecation_warning(offset, &messages::DEPRECATED_VAL_IN_FOR, &[]);
            } else {
                self.syntax_error(offset, &messages::VAL_IN_FOR_WITHOUT_ASSIGNMENT, &[], false);
            }
        }
        if has_eq && eq_ok {
            self.next();
        } else {
            self.accept(TokenKind::LArrow);
        }
        let rhs = self.expr(Location::Local);
        out.push(self.b.mk_generator(pat, has_eq && eq_ok, rhs));
        while self.at(TokenKind::If) {
            let test = self.guard();
            out.push(self.b.mk_filter(test));
        }
    }

    fn guard(&mut self) -> Tree<'a> {
        if self.at(TokenKind::If) {
            self.next();
            let t = self.postfix_expr();
            self.b.strip_parens(t)
        } else {
            Tree::empty(self.offset())
        }
    }

    /// `implicit x => body` / `implicit x: T => body`.
    fn implicit_closure(&mut self, start: u32, location: Location) -> Tree<'a> {
        let pstart = self.offset();
        let name = self.ident();
        let mut param_expr = self.b.ident(self.r(pstart), name);
        if self.at(TokenKind::Colon) {
            self.next();
            let tpt = self.type_or_infix_type(location);
            let range = self.r(pstart);
            param_expr = self.b.at(
                range,
                TreeKind::Typed {
                    expr: self.b.alloc(param_expr),
                    tpt: self.b.alloc(tpt),
                },
            );
        }
        let param = self.convert_to_param(param_expr);
        let param = match param.kind {
            TreeKind::ValDef { mods, name, tpt, rhs } => Tree::new(
                param.range,
                TreeKind::ValDef { mods: mods.and(ModFlags::IMPLICIT), name, tpt, rhs },
            ),
            _ => param,
        };
        self.accept(TokenKind::Arrow);
        let body = if location != Location::InBlock {
            self.expr(Location::Local)
        } else {
            self.block()
        };
        let range = self.r(start);
        self.b.at(
            range,
            TreeKind::Function {
                params: self.b.alloc_list(vec![param]),
                body: self.b.alloc(body),
            },
        )
    }

    // ------------------------------------------------------------------
    // The precedence engine
    // ------------------------------------------------------------------

    fn push_op_info(&mut self, top: Tree<'a>) {
        let operator = self.current_name();
        let offset = self.offset();
        self.ident();
        let targs = if self.at(TokenKind::LBracket) {
            self.expr_type_args()
        } else {
            Vec::new()
        };
        self.opstack.push(OpInfo::new(top, operator, targs, offset));
    }

    fn expr_type_args(&mut self) -> Vec<Tree<'a>> {
        self.in_brackets(|p| p.types())
    }

    fn reduce_expr_stack(&mut self, base: usize, top: Tree<'a>) -> Tree<'a> {
        self.reduce_stack(true, base, top)
    }

    fn reduce_pattern_stack(&mut self, base: usize, top: Tree<'a>) -> Tree<'a> {
        self.reduce_stack(false, base, top)
    }

    fn reduce_stack(&mut self, is_expr: bool, base: usize, top: Tree<'a>) -> Tree<'a> {
        let (op_precedence, left_assoc) = if self.is_ident_token() {
            let name = self.current_name();
            (self.names.precedence(name), !self.names.is_right_assoc(name))
        } else {
            (0, true)
        };
        self.reduce_stack_with(is_expr, base, top, op_precedence, left_assoc)
    }

    /// Pop and apply pending operators while the incoming operator binds
    /// no tighter. Equal precedence requires matching associativity.
    fn reduce_stack_with(
        &mut self,
        is_expr: bool,
        base: usize,
        mut top: Tree<'a>,
        op_precedence: u8,
        left_assoc: bool,
    ) -> Tree<'a> {
        if self.opstack.len() > base {
            let head = self.opstack.last().unwrap();
            let head_prec = self.names.precedence(head.operator);
            if head_prec == op_precedence {
                let offset = head.offset;
                let operator = head.operator;
                self.check_assoc(offset, operator, left_assoc);
            }
        }
        loop {
            if self.opstack.len() <= base {
                break;
            }
            let head_prec = self.names.precedence(self.opstack.last().unwrap().operator);
            let can_reduce = op_precedence < head_prec || (left_assoc && op_precedence == head_prec);
            if !can_reduce {
                break;
            }
            let info = self.opstack.pop().unwrap();
            if !is_expr && !info.targs.is_empty() {
                self.syntax_error(info.offset, &messages::TYPE_ARGS_IN_PATTERN_OPERATOR, &[], false);
            }
            top = self
                .b
                .mk_binop(is_expr, info.operand, info.operator, info.offset, info.targs, top);
        }
        top
    }

    /// `PostfixExpr ::= InfixExpr [id [nl]]`. Infix operators are pushed
    /// onto the shared stack; a dangling operator becomes a postfix
    /// selection.
    fn postfix_expr(&mut self) -> Tree<'a> {
        let start = self.offset();
        let base = self.opstack.len();
        let mut top = self.prefix_expr();
        while self.is_ident_token() {
            let reduced = self.reduce_expr_stack(base, top);
            self.push_op_info(reduced);
            self.newline_opt_when_following(|k| k.can_start_expression());
            if self.is_expr_intro() {
                top = self.prefix_expr();
            } else {
                let info = self.opstack.pop().unwrap();
                if !info.targs.is_empty() {
                    self.syntax_error(info.offset, &messages::TYPE_ARGS_ON_POSTFIX, &[], false);
                }
                let od = self.reduce_expr_stack(base, info.operand);
                let op_end = self.scanner.last_offset();
                return self.b.mk_postfix_select(start, op_end, od, info.operator);
            }
        }
        self.reduce_expr_stack(base, top)
    }

    /// `PrefixExpr ::= [+ | - | ~ | !] SimpleExpr`. A unary minus on a
    /// numeric literal folds into a negated literal.
    fn prefix_expr(&mut self) -> Tree<'a> {
        if self.is_unary_op() {
            let start = self.offset();
            let name = self.current_name();
            let ahead_is_simple = self.looking_ahead(|p| p.is_simple_expr_intro());
            if ahead_is_simple {
                self.next();
                if name.text == self.names.std.minus && self.is_numeric_lit() {
                    let lit = self.literal(true, false, start);
                    return self.simple_expr_rest(start, lit, true);
                }
                let operand = self.simple_expr();
                let operand = self.b.strip_parens(operand);
                let unary = self.names.unary_op(name);
                return self.b.select(self.r(start), operand, unary);
            }
        }
        self.simple_expr()
    }

    fn simple_expr(&mut self) -> Tree<'a> {
        let start = self.offset();
        let mut can_apply = true;
        let t = if self.token().is_literal() {
            self.literal(false, false, start)
        } else {
            match self.token() {
                TokenKind::XmlStart => self.xml_literal(),
                TokenKind::Ident | TokenKind::BackquotedIdent | TokenKind::This | TokenKind::Super => {
                    self.path(true, false)
                }
                TokenKind::Underscore => self.fresh_placeholder(),
                TokenKind::LParen => {
                    self.next();
                    let ts = if self.at(TokenKind::RParen) {
                        Vec::new()
                    } else {
                        self.comma_separated(|p| p.expr(Location::Local))
                    };
                    self.accept(TokenKind::RParen);
                    let range = self.r(start);
                    self.b.at(range, TreeKind::Parens(self.b.alloc_list(ts)))
                }
                TokenKind::LBrace => {
                    can_apply = false;
                    self.block_expr()
                }
                TokenKind::New => {
                    can_apply = false;
                    let nstart = self.skip_token();
                    let (parents, self_def, body) = self.template();
                    self.b.mk_new(self.r(nstart), parents, self_def, body)
                }
                _ => {
                    self.syntax_error_or_incomplete(&messages::ILLEGAL_START_OF_SIMPLE_EXPRESSION, &[], true);
                    self.error_term_tree()
                }
            }
        };
        self.simple_expr_rest(start, t, can_apply)
    }

    fn simple_expr_rest(&mut self, start: u32, t: Tree<'a>, can_apply: bool) -> Tree<'a> {
        if can_apply {
            self.newline_opt_when_followed_by(TokenKind::LBrace);
        }
        match self.token() {
            TokenKind::Dot => {
                self.next();
                let stripped = self.b.strip_parens(t);
                let sel = self.selector(stripped, start);
                self.simple_expr_rest(start, sel, true)
            }
            TokenKind::LBracket => {
                let t1 = self.b.strip_parens(t);
                if t1.is_assignable() {
                    let mut app = t1;
                    while self.at(TokenKind::LBracket) {
                        let targs = self.expr_type_args();
                        let range = self.r(start);
                        app = self.b.at(
                            range,
                            TreeKind::TypeApply {
                                fun: self.b.alloc(app),
                                args: self.b.alloc_list(targs),
                            },
                        );
                    }
                    self.simple_expr_rest(start, app, true)
                } else {
                    t1
                }
            }
            TokenKind::LParen | TokenKind::LBrace if can_apply => {
                // `(f _)(x)` must become `(f _).apply(x)`, not an
                // application of the eta-expansion.
                let fun = match t.kind {
                    TreeKind::Parens(ts)
                        if ts.len() == 1
                            && matches!(ts[0].kind, TreeKind::Typed { tpt, .. }
                                if matches!(tpt.kind, TreeKind::Function { .. })) =>
                    {
                        let stripped = self.b.strip_parens(t);
                        self.b
                            .select(self.r(start), stripped, self.names.term_of(self.names.std.apply))
                    }
                    _ => self.b.strip_parens(t),
                };
                let args = self.argument_exprs();
                let app = self.b.apply(self.r(start), fun, args);
                self.simple_expr_rest(start, app, true)
            }
            TokenKind::Underscore => {
                self.next();
                let stripped = self.b.strip_parens(t);
                let range = self.r(start);
                let marker = self.b.at(
                    TextRange::empty(range.end),
                    TreeKind::Function {
                        params: &[],
                        body: self.b.alloc(Tree::empty(range.end)),
                    },
                );
                self.b.at(
                    range,
                    TreeKind::Typed {
                        expr: self.b.alloc(stripped),
                        tpt: self.b.alloc(marker),
                    },
                )
            }
            _ => t,
        }
    }

    fn argument_exprs(&mut self) -> Vec<Tree<'a>> {
        match self.token() {
            TokenKind::LBrace => vec![self.block_expr()],
            TokenKind::LParen => self.in_parens(|p| {
                if p.at(TokenKind::RParen) {
                    Vec::new()
                } else {
                    p.comma_separated(|p2| {
                        let e = p2.expr(Location::Local);
                        p2.b.assignment_to_named_arg(e)
                    })
                }
            }),
            _ => Vec::new(),
        }
    }

    fn multiple_argument_exprs(&mut self) -> Vec<Vec<Tree<'a>>> {
        let mut argss = Vec::new();
        while self.at(TokenKind::LParen) {
            argss.push(self.argument_exprs());
        }
        argss
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// `{ CaseClauses }` is an anonymous partial function; otherwise a
    /// plain block.
    fn block_expr(&mut self) -> Tree<'a> {
        let start = self.offset();
        self.in_braces(|p| {
            if p.at(TokenKind::Case) && !matches!(p.peek_token(), TokenKind::Class | TokenKind::Object) {
                let cases = p.case_clauses();
                p.b.mk_visitor(p.r(start), cases)
            } else {
                p.block()
            }
        })
    }

    /// A block body; also a placeholder-escape boundary.
    fn block(&mut self) -> Tree<'a> {
        self.check_no_escaping_placeholders(|p| {
            let start = p.offset();
            let stats = p.block_stat_seq();
            p.make_block(p.r(start), stats)
        })
    }

    /// A statement sequence as a block value: empty is unit, a single
    /// expression is itself, a trailing definition synthesizes a unit
    /// result.
    fn make_block(&mut self, range: TextRange, mut stats: Vec<Tree<'a>>) -> Tree<'a> {
        let is_term = stats.last().map_or(false, |t| {
            !matches!(
                t.kind,
                TreeKind::ValDef { .. }
                    | TreeKind::DefDef { .. }
                    | TreeKind::TypeDef { .. }
                    | TreeKind::ClassDef { .. }
                    | TreeKind::ModuleDef { .. }
                    | TreeKind::Import { .. }
            )
        });
        if stats.is_empty() {
            return self.b.literal_unit(range.end);
        }
        if is_term {
            if stats.len() == 1 {
                return stats.pop().unwrap();
            }
            let expr = stats.pop().unwrap();
            self.b.mk_block(range, stats, expr)
        } else {
            let unit = self.b.literal_unit(range.end);
            self.b.mk_block(range, stats, unit)
        }
    }

    fn block_stat_seq(&mut self) -> Vec<Tree<'a>> {
        let mut stats = Vec::new();
        loop {
            if self.is_stat_seq_end() {
                break;
            }
            if self.at(TokenKind::Case)
                && !matches!(self.peek_token(), TokenKind::Class | TokenKind::Object)
            {
                break;
            }
            if self.at(TokenKind::Import) {
                stats.extend(self.import_clause());
                self.accept_stat_sep_opt();
            } else if self.is_def_intro()
                || self.token().is_local_modifier()
                || self.is_annotation_intro()
            {
                if self.at(TokenKind::Implicit) {
                    let start = self.skip_token();
                    if self.is_ident_token() {
                        stats.push(self.implicit_closure(start, Location::InBlock));
                    } else {
                        stats.extend(self.local_def(ModFlags::IMPLICIT));
                    }
                } else {
                    stats.extend(self.local_def(ModFlags::NONE));
                }
                self.accept_stat_sep_opt();
            } else if self.is_expr_intro() {
                stats.push(self.statement(Location::InBlock));
                if !self.is_case_def_end() {
                    self.accept_stat_sep();
                }
            } else if self.is_stat_sep() {
                self.next();
            } else {
                self.syntax_error_or_incomplete(&messages::ILLEGAL_START_OF_STATEMENT, &[], true);
            }
        }
        stats
    }

    // ------------------------------------------------------------------
    // Case clauses
    // ------------------------------------------------------------------

    fn case_clauses(&mut self) -> Vec<Tree<'a>> {
        let mut cases = Vec::new();
        while self.at(TokenKind::Case) {
            self.next();
            cases.push(self.case_clause());
        }
        if cases.is_empty() {
            self.accept(TokenKind::Case);
        }
        cases
    }

    fn case_clause(&mut self) -> Tree<'a> {
        let start = self.offset();
        let pat = self.pattern(NO_SEQ);
        let guard = self.guard();
        self.accept(TokenKind::Arrow);
        let body = self.block();
        self.b.mk_case_def(self.r(start), pat, guard, body)
    }

    /// Markup literals are an extension point; the default parser rejects
    /// them.
    fn xml_literal(&mut self) -> Tree<'a> {
        self.syntax_error_or_incomplete(&messages::XML_NOT_SUPPORTED, &[], true);
        self.error_term_tree()
    }

    fn xml_literal_pattern(&mut self) -> Tree<'a> {
        self.syntax_error_or_incomplete(&messages::XML_NOT_SUPPORTED, &[], true);
        self.error_pattern_tree()
    }
}

// ============================================================================
// Patterns
// ============================================================================
//
// Pattern parsing is parameterised on a small context: whether `_*` is
// accepted (argument positions) and whether the surrounding literal is
// markup (which changes the close delimiter). The precedence engine is
// the same one expression parsing uses.

impl<'a> Parser<'a> {
    fn patterns(&mut self, ctx: PatCtx) -> Vec<Tree<'a>> {
        self.comma_separated(|p| p.pattern(ctx))
    }

    /// `Pattern ::= Pattern1 { | Pattern1 }`.
    fn pattern(&mut self, ctx: PatCtx) -> Tree<'a> {
        let start = self.offset();
        let first = self.pattern1(ctx);
        if self.is_raw_bar() {
            let mut alts = vec![first];
            while self.is_raw_bar() {
                self.next();
                alts.push(self.pattern1(ctx));
            }
            let range = self.r(start);
            self.b.at(range, TreeKind::Alternative(self.b.alloc_list(alts)))
        } else {
            first
        }
    }

    /// `Pattern1 ::= varid : TypePat | _ : TypePat | Pattern2`. A typed
    /// pattern requires a lowercase-initial identifier.
    fn pattern1(&mut self, ctx: PatCtx) -> Tree<'a> {
        let start = self.offset();
        let p = self.pattern2(ctx);
        if self.at(TokenKind::Colon) {
            if let TreeKind::Ident(name) = p.kind {
                if self.names.starts_with_lower(name) {
                    self.next();
                    let tpt = self.with_pattern_types(|p2| {
                        let tstart = p2.offset();
                        p2.compound_type(tstart)
                    });
                    let range = self.r(start);
                    return self.b.at(
                        range,
                        TreeKind::Typed {
                            expr: self.b.alloc(p),
                            tpt: self.b.alloc(tpt),
                        },
                    );
                } else {
                    let offset = self.offset();
                    self.syntax_error(offset, &messages::PATTERN_VARIABLE_LOWERCASE, &[], false);
                }
            }
        }
        p
    }

    /// `Pattern2 ::= varid [@ Pattern3] | Pattern3`. `_ @ p` is just `p`;
    /// `x @ p` binds.
    fn pattern2(&mut self, ctx: PatCtx) -> Tree<'a> {
        let start = self.offset();
        let p = self.pattern3(ctx);
        if !self.at(TokenKind::At) {
            return p;
        }
        match p.kind {
            TreeKind::Ident(name) if self.names.is_wildcard(name) => {
                self.next();
                self.pattern3(ctx)
            }
            TreeKind::Ident(name) if self.names.starts_with_lower(name) => {
                self.next();
                let body = self.pattern3(ctx);
                let range = self.r(start);
                self.b.at(range, TreeKind::Bind { name, body: self.b.alloc(body) })
            }
            _ => p,
        }
    }

    /// `Pattern3 ::= SimplePattern { id SimplePattern }` over the shared
    /// operator stack, plus the `_*` sequence special case.
    fn pattern3(&mut self, ctx: PatCtx) -> Tree<'a> {
        let top = self.simple_pattern(ctx);
        let base = self.opstack.len();

        // `_*` directly before the close delimiter is a sequence
        // wildcard; anywhere else the `*` is an infix operator.
        if ctx.seq_ok && self.is_raw_star() {
            if let TreeKind::Ident(name) = top.kind {
                if self.names.is_wildcard(name) {
                    let close = if ctx.is_xml { TokenKind::RBrace } else { TokenKind::RParen };
                    let star = self.peeking_ahead(|p| {
                        if p.token() == close {
                            let stripped = p.b.strip_parens(top.clone());
                            let range = TextRange::new(top.range.pos, p.scanner.last_offset());
                            Some(p.b.at(range, TreeKind::Star(p.b.alloc(stripped))))
                        } else {
                            None
                        }
                    });
                    if let Some(t) = star {
                        return t;
                    }
                }
            }
        }

        let mut top = top;
        loop {
            top = self.reduce_pattern_stack(base, top);
            if self.is_ident_token() && !self.is_raw_bar() {
                self.push_op_info(top);
                top = self.simple_pattern(ctx);
            } else {
                return top;
            }
        }
    }

    /// `SimplePattern ::= varid | _ | literal | StableId [TypeArgs]
    ///                    [( Patterns )] | ( Patterns )`.
    fn simple_pattern(&mut self, ctx: PatCtx) -> Tree<'a> {
        let start = self.offset();
        match self.token() {
            TokenKind::Ident | TokenKind::BackquotedIdent | TokenKind::This => {
                // `-1` in a pattern is a negated literal, not a prefix op.
                if self.is_raw_ident_of(self.names.std.minus) {
                    let ahead_numeric = self.looking_ahead(|p| p.is_numeric_lit());
                    if ahead_numeric {
                        self.next();
                        return self.literal(true, true, start);
                    }
                }
                let t = self.stable_id();
                let type_applied = if self.at(TokenKind::LBracket) {
                    let tpt = self.b.convert_to_type_id(t);
                    let args = self.with_pattern_types(|p| p.type_args());
                    let range = self.r(start);
                    self.b.at(
                        range,
                        TreeKind::AppliedType {
                            tpt: self.b.alloc(tpt),
                            args: self.b.alloc_list(args),
                        },
                    )
                } else {
                    t
                };
                if self.at(TokenKind::LParen) {
                    let args = self.argument_patterns();
                    let range = self.r(start);
                    self.b.at(
                        range,
                        TreeKind::Apply {
                            fun: self.b.alloc(type_applied),
                            args: self.b.alloc_list(args),
                        },
                    )
                } else {
                    type_applied
                }
            }
            TokenKind::Underscore => {
                self.next();
                self.b.wildcard_ident(self.r(start))
            }
            TokenKind::LParen => {
                self.next();
                let ts = if self.at(TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.patterns(NO_SEQ)
                };
                self.accept(TokenKind::RParen);
                let range = self.r(start);
                let parens = self.b.at(range, TreeKind::Parens(self.b.alloc_list(ts)));
                self.b.strip_parens(parens)
            }
            TokenKind::XmlStart => self.xml_literal_pattern(),
            kind if kind.is_literal() => self.literal(false, true, start),
            _ => self.bad_pattern3(ctx),
        }
    }

    /// Targeted diagnostics for misplaced `_*` and other bad simple
    /// patterns, with recovery that avoids eating pattern delimiters.
    fn bad_pattern3(&mut self, ctx: PatCtx) -> Tree<'a> {
        let is_comma = self.at(TokenKind::Comma);
        let is_delimiter = matches!(self.token(), TokenKind::RParen | TokenKind::RBrace);
        let (is_underscore, is_star) = match self.opstack.last() {
            Some(info) if info.operator.text == self.names.std.star => {
                let under = matches!(info.operand.kind, TreeKind::Ident(n) if self.names.is_wildcard(n));
                (under, true)
            }
            _ => (false, false),
        };
        let msg: &DiagnosticMessage = match (is_underscore, is_star, ctx.seq_ok) {
            (true, true, true) if is_comma => &messages::SEQUENCE_PATTERN_NOT_LAST,
            (true, true, true) if is_delimiter => &messages::BAD_BRACE_OR_PAREN_AFTER_STAR,
            (true, true, false) if is_delimiter => &messages::SEQUENCE_PATTERN_OUTSIDE_ARGS,
            (false, true, true) if is_delimiter => &messages::USE_WILDCARD_STAR_FOR_SEQUENCE,
            (false, true, _) if is_comma || is_delimiter => &messages::TRAILING_STAR_PATTERN,
            _ => &messages::ILLEGAL_START_OF_SIMPLE_PATTERN,
        };
        let is_seq_pattern_close = is_underscore && is_star && ctx.seq_ok && is_delimiter;
        let skip = !(is_comma || is_delimiter) || is_seq_pattern_close;
        self.syntax_error_or_incomplete(msg, &[], skip);
        self.error_pattern_tree()
    }

    fn argument_patterns(&mut self) -> Vec<Tree<'a>> {
        self.in_parens(|p| {
            if p.at(TokenKind::RParen) {
                Vec::new()
            } else {
                p.patterns(SEQ_OK)
            }
        })
    }

    fn with_pattern_types<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.in_pattern_type;
        self.in_pattern_type = true;
        let result = f(self);
        self.in_pattern_type = saved;
        result
    }
}

// ============================================================================
// Modifiers and annotations
// ============================================================================

impl<'a> Parser<'a> {
    fn add_mod(&mut self, mut mods: Modifiers<'a>, flag: ModFlags) -> Modifiers<'a> {
        if mods.has(flag) {
            let offset = self.offset();
            self.syntax_error(offset, &messages::REPEATED_MODIFIER, &[], false);
        }
        mods.flags |= flag;
        self.next();
        mods
    }

    fn modifiers(&mut self) -> Modifiers<'a> {
        let mut mods = Modifiers::empty();
        loop {
            match self.token() {
                TokenKind::Private => {
                    mods = self.add_mod(mods, ModFlags::PRIVATE);
                    mods = self.access_qualifier_opt(mods);
                }
                TokenKind::Protected => {
                    mods = self.add_mod(mods, ModFlags::PROTECTED);
                    mods = self.access_qualifier_opt(mods);
                }
                TokenKind::Abstract => mods = self.add_mod(mods, ModFlags::ABSTRACT),
                TokenKind::Final => mods = self.add_mod(mods, ModFlags::FINAL),
                TokenKind::Sealed => mods = self.add_mod(mods, ModFlags::SEALED),
                TokenKind::Override => mods = self.add_mod(mods, ModFlags::OVERRIDE),
                TokenKind::Implicit => mods = self.add_mod(mods, ModFlags::IMPLICIT),
                TokenKind::Lazy => mods = self.add_mod(mods, ModFlags::LAZY),
                TokenKind::NewLine => self.next(),
                _ => return mods,
            }
        }
    }

    fn local_modifiers(&mut self) -> Modifiers<'a> {
        let mut mods = Modifiers::empty();
        loop {
            match self.token() {
                TokenKind::Abstract => mods = self.add_mod(mods, ModFlags::ABSTRACT),
                TokenKind::Final => mods = self.add_mod(mods, ModFlags::FINAL),
                TokenKind::Sealed => mods = self.add_mod(mods, ModFlags::SEALED),
                TokenKind::Implicit => mods = self.add_mod(mods, ModFlags::IMPLICIT),
                TokenKind::Lazy => mods = self.add_mod(mods, ModFlags::LAZY),
                _ => return mods,
            }
        }
    }

    fn access_modifier_opt(&mut self) -> Modifiers<'a> {
        let mut mods = Modifiers::empty();
        match self.token() {
            TokenKind::Private => {
                mods = self.add_mod(mods, ModFlags::PRIVATE);
                mods = self.access_qualifier_opt(mods);
            }
            TokenKind::Protected => {
                mods = self.add_mod(mods, ModFlags::PROTECTED);
                mods = self.access_qualifier_opt(mods);
            }
            _ => {}
        }
        mods
    }

    /// `private[qualifier]` / `protected[this]`.
    fn access_qualifier_opt(&mut self, mut mods: Modifiers<'a>) -> Modifiers<'a> {
        if self.at(TokenKind::LBracket) {
            self.next();
            if mods.priv_within.is_some() {
                let offset = self.offset();
                self.syntax_error(offset, &messages::DUPLICATE_ACCESS_QUALIFIER, &[], false);
            }
            if self.at(TokenKind::This) {
                self.next();
                mods.priv_within = Some(self.names.type_of(self.names.std.this_));
            } else {
                mods.priv_within = Some(self.ident_for_type());
            }
            self.accept(TokenKind::RBracket);
        }
        mods
    }

    fn annotations(&mut self, skip_newlines: bool) -> Vec<Tree<'a>> {
        let mut annots = Vec::new();
        while self.is_annotation_intro() {
            self.next();
            annots.push(self.annotation_expr());
            if skip_newlines {
                self.newline_opt();
            }
        }
        annots
    }

    fn annotation_expr(&mut self) -> Tree<'a> {
        let start = self.offset();
        let t = self.expr_simple_type();
        let argss = if self.at(TokenKind::LParen) {
            self.multiple_argument_exprs()
        } else {
            Vec::new()
        };
        self.b.mk_new_apply(self.r(start), t, argss)
    }

    /// Annotations on the primary constructor take a single argument list.
    fn constructor_annotations(&mut self) -> Vec<Tree<'a>> {
        let mut annots = Vec::new();
        while self.is_annotation_intro() {
            self.next();
            let start = self.offset();
            let t = self.expr_simple_type();
            let argss = if self.at(TokenKind::LParen) {
                vec![self.argument_exprs()]
            } else {
                Vec::new()
            };
            annots.push(self.b.mk_new_apply(self.r(start), t, argss));
        }
        annots
    }
}

// ============================================================================
// Parameters and type parameters
// ============================================================================

impl<'a> Parser<'a> {
    /// Parameter clauses, with a trailing implicit clause at most. Context
    /// bounds synthesize evidence parameters appended as (or merged into)
    /// the final implicit clause.
    fn param_clauses(
        &mut self,
        owner: Name,
        is_constructor: bool,
        owner_is_type: bool,
        context_bounds: &[&'a Tree<'a>],
        of_case_class: bool,
    ) -> Vec<Vec<Tree<'a>>> {
        let mut implicit_seen = false;
        let mut case_param = of_case_class;
        let mut vparamss: Vec<Vec<Tree<'a>>> = Vec::new();
        let start = self.offset();
        self.newline_opt_when_followed_by(TokenKind::LParen);
        if of_case_class && !self.at(TokenKind::LParen) {
            let name_str = self.names.display(owner);
            let offset = self.scanner.last_offset();
            self.syntax_error(offset, &messages::CASE_CLASS_NEEDS_PARAMS, &[&name_str], false);
        }
        while !implicit_seen && self.at(TokenKind::LParen) {
            self.next();
            let clause = if self.at(TokenKind::RParen) {
                Vec::new()
            } else {
                if self.at(TokenKind::Implicit) {
                    self.next();
                    implicit_seen = true;
                }
                let is_implicit = implicit_seen;
                self.comma_separated(|p| p.param(owner_is_type, is_implicit, case_param))
            };
            vparamss.push(clause);
            self.accept(TokenKind::RParen);
            case_param = false;
            self.newline_opt_when_followed_by(TokenKind::LParen);
        }
        if of_case_class {
            if let Some(first) = vparamss.first() {
                if first.iter().take(1).any(|p| is_implicit_param(p)) {
                    let name_str = self.names.display(owner);
                    self.syntax_error(start, &messages::CASE_CLASS_IMPLICIT_FIRST, &[&name_str], false);
                }
            }
        }
        if is_constructor
            && (vparamss.is_empty() || vparamss[0].iter().take(1).any(|p| is_implicit_param(p)))
        {
            match self.token() {
                TokenKind::LBracket => {
                    let offset = self.offset();
                    self.syntax_error(offset, &messages::NO_TYPE_PARAMS_HERE, &[], false);
                }
                TokenKind::Eof => {
                    self.incomplete_input_error(&messages::AUXILIARY_CONSTRUCTOR_IMPLICIT_FIRST, &[]);
                }
                _ => {
                    self.syntax_error(start, &messages::AUXILIARY_CONSTRUCTOR_IMPLICIT_FIRST, &[], false);
                }
            }
        }
        self.add_evidence_params(owner_is_type, vparamss, context_bounds)
    }

    fn param(&mut self, owner_is_type: bool, is_implicit: bool, case_param: bool) -> Tree<'a> {
        let start = self.offset();
        let annots = self.annotations(false);
        let mut mods = Modifiers::with_flags(ModFlags::PARAM);
        let mut has_val_or_var = false;
        if owner_is_type {
            mods = self.modifiers();
            mods.flags |= ModFlags::PARAM | ModFlags::PARAMACCESSOR;
            if mods.is_lazy() {
                let offset = self.offset();
                self.syntax_error(offset, &messages::LAZY_MODIFIER_ON_PARAM, &[], false);
            }
            match self.token() {
                TokenKind::Val => {
                    has_val_or_var = true;
                    self.next();
                }
                TokenKind::Var => {
                    has_val_or_var = true;
                    mods.flags |= ModFlags::MUTABLE;
                    self.next();
                }
                _ => {}
            }
            if case_param {
                mods.flags |= ModFlags::CASEACCESSOR;
            }
        }
        if !annots.is_empty() {
            mods.annotations = self.b.alloc_list(annots);
        }
        let name = self.ident();
        let tpt = if self.options.method_type_infer && !owner_is_type && !self.at(TokenKind::Colon) {
            Tree::empty(self.scanner.last_offset())
        } else {
            self.accept(TokenKind::Colon);
            if self.at(TokenKind::Arrow) {
                if owner_is_type && has_val_or_var {
                    let offset = self.offset();
                    self.syntax_error(offset, &messages::VAL_PARAM_NOT_BY_NAME, &[], false);
                } else if is_implicit {
                    let offset = self.offset();
                    self.syntax_error(offset, &messages::IMPLICIT_PARAM_NOT_BY_NAME, &[], false);
                } else {
                    mods.flags |= ModFlags::BYNAMEPARAM;
                }
            }
            self.param_type(false)
        };
        let default = if self.at(TokenKind::Eq) {
            self.next();
            mods.flags |= ModFlags::DEFAULTPARAM;
            self.expr(Location::Local)
        } else {
            Tree::empty(self.scanner.last_offset())
        };
        if is_implicit {
            mods.flags |= ModFlags::IMPLICIT;
        }
        let range = self.r(start);
        self.b.at(
            range,
            TreeKind::ValDef {
                mods,
                name,
                tpt: self.b.alloc(tpt),
                rhs: self.b.alloc(default),
            },
        )
    }

    /// `[T, +U <: B, V : Ctx <% View]`. View and context bounds are
    /// collected for later evidence-parameter synthesis; view bounds are
    /// deprecated.
    fn type_param_clause_opt(
        &mut self,
        owner_is_type: bool,
        mut context_bounds: Option<&mut Vec<&'a Tree<'a>>>,
    ) -> Vec<Tree<'a>> {
        let mut tparams = Vec::new();
        self.newline_opt_when_followed_by(TokenKind::LBracket);
        if !self.at(TokenKind::LBracket) {
            return tparams;
        }
        self.accept(TokenKind::LBracket);
        loop {
            let annots = self.annotations(true);
            tparams.push(self.type_param(owner_is_type, annots, context_bounds.as_deref_mut()));
            if self.at(TokenKind::Comma) {
                self.next();
            } else {
                break;
            }
        }
        self.accept(TokenKind::RBracket);
        tparams
    }

    fn type_param(
        &mut self,
        owner_is_type: bool,
        annots: Vec<Tree<'a>>,
        context_bounds: Option<&mut Vec<&'a Tree<'a>>>,
    ) -> Tree<'a> {
        let start = self.offset();
        let mut mods = Modifiers::with_flags(ModFlags::PARAM | ModFlags::DEFERRED);
        if owner_is_type && self.is_ident_token() {
            if self.is_raw_ident_of(self.names.std.plus) {
                self.next();
                mods.flags |= ModFlags::COVARIANT;
            } else if self.is_raw_ident_of(self.names.std.minus) {
                self.next();
                mods.flags |= ModFlags::CONTRAVARIANT;
            }
        }
        if !annots.is_empty() {
            mods.annotations = self.b.alloc_list(annots);
        }
        let pname = self.wildcard_or_ident().to_type();
        let nested = self.type_param_clause_opt(true, None);
        let bounds = self.type_bounds();
        let range = self.r(start);
        let param = self.b.at(
            range,
            TreeKind::TypeDef {
                mods,
                name: pname,
                tparams: self.b.alloc_list(nested),
                rhs: self.b.alloc(bounds),
            },
        );
        if let Some(buf) = context_bounds {
            while self.at(TokenKind::ViewBound) {
                let offset = self.offset();
                self.deprecation_warning(offset, &messages::DEPRECATED_VIEW_BOUND, &[]);
                self.next();
                let target = self.typ();
                let arg = self.b.ident(TextRange::empty(offset), pname);
                let view = self.b.mk_function_type(target.range, vec![arg], target);
                buf.push(self.b.alloc(view));
            }
            while self.at(TokenKind::Colon) {
                self.next();
                let tycon = self.typ();
                let range = tycon.range;
                let arg = self.b.ident(TextRange::empty(range.pos), pname);
                let applied = self.b.at(
                    range,
                    TreeKind::AppliedType {
                        tpt: self.b.alloc(tycon),
                        args: self.b.alloc_list(vec![arg]),
                    },
                );
                buf.push(self.b.alloc(applied));
            }
        }
        param
    }

    /// Evidence parameters from context bounds go into the final implicit
    /// clause, creating one if needed.
    fn add_evidence_params(
        &mut self,
        owner_is_type: bool,
        mut vparamss: Vec<Vec<Tree<'a>>>,
        context_bounds: &[&'a Tree<'a>],
    ) -> Vec<Vec<Tree<'a>>> {
        if context_bounds.is_empty() {
            return vparamss;
        }
        let base_flags = if owner_is_type {
            ModFlags::PARAM | ModFlags::PARAMACCESSOR | ModFlags::PRIVATE
        } else {
            ModFlags::PARAM
        };
        let evidence: Vec<Tree<'a>> = context_bounds
            .iter()
            .map(|tpt| {
                let name = self.names.fresh_term_name("evidence$");
                let range = tpt.range;
                self.b.at(
                    range,
                    TreeKind::ValDef {
                        mods: Modifiers::with_flags(
                            base_flags | ModFlags::IMPLICIT | ModFlags::SYNTHETIC,
                        ),
                        name,
                        tpt,
                        rhs: self.b.alloc(Tree::empty(range.end)),
                    },
                )
            })
            .collect();
        let last_is_implicit = vparamss
            .last()
            .map_or(false, |c| c.first().map_or(false, is_implicit_param));
        if last_is_implicit {
            let mut last = vparamss.pop().unwrap();
            let mut merged = evidence;
            merged.append(&mut last);
            vparamss.push(merged);
        } else {
            vparamss.push(evidence);
        }
        vparamss
    }

    fn alloc_vparamss(&mut self, vparamss: Vec<Vec<Tree<'a>>>) -> &'a [&'a [Tree<'a>]] {
        let lists: Vec<&'a [Tree<'a>]> = vparamss.into_iter().map(|v| self.b.alloc_list(v)).collect();
        self.b.alloc_param_lists(lists)
    }
}

fn is_implicit_param(t: &Tree<'_>) -> bool {
    matches!(t.kind, TreeKind::ValDef { mods, .. } if mods.is_implicit())
}

// ============================================================================
// Definitions
// ============================================================================

impl<'a> Parser<'a> {
    fn def_or_dcl(&mut self, start: u32, mods: Modifiers<'a>) -> Vec<Tree<'a>> {
        if mods.is_lazy() && !self.at(TokenKind::Val) {
            let offset = self.offset();
            self.syntax_error(offset, &messages::LAZY_VALUES_ONLY, &[], false);
        }
        match self.token() {
            TokenKind::Val => self.pat_def_or_dcl(start, mods),
            TokenKind::Var => self.pat_def_or_dcl(start, mods.and(ModFlags::MUTABLE)),
            TokenKind::Def => vec![self.fun_def_or_dcl(start, mods)],
            TokenKind::Type => vec![self.type_def_or_dcl(start, mods)],
            _ => vec![self.tmpl_def(start, mods)],
        }
    }

    fn non_local_def_or_dcl(&mut self) -> Vec<Tree<'a>> {
        let start = self.offset();
        let annots = self.annotations(true);
        let mut mods = self.modifiers();
        if !annots.is_empty() {
            mods.annotations = self.b.alloc_list(annots);
        }
        self.def_or_dcl(start, mods)
    }

    fn local_def(&mut self, implicit_flag: ModFlags) -> Vec<Tree<'a>> {
        let start = self.offset();
        let annots = self.annotations(true);
        let mut mods = self.local_modifiers();
        mods.flags |= implicit_flag;
        if !annots.is_empty() {
            mods.annotations = self.b.alloc_list(annots);
        }
        self.def_or_dcl(start, mods)
    }

    /// `val/var Pattern2 {, Pattern2} [: Type] [= Expr]`, desugared to
    /// plain vals, or a matcher plus accessors for non-variable patterns.
    fn pat_def_or_dcl(&mut self, start: u32, mods: Modifiers<'a>) -> Vec<Tree<'a>> {
        let mut newmods = mods;
        self.next();
        let mut lhs = Vec::new();
        loop {
            let p = self.pattern2(NO_SEQ);
            lhs.push(self.b.strip_parens(p));
            if self.at(TokenKind::Comma) {
                self.next();
            } else {
                break;
            }
        }
        let tp = self.typed_opt();
        let has_type = !tp.is_empty();
        let tp_ref = self.b.alloc(tp);
        let all_idents = lhs.iter().all(|p| matches!(p.kind, TreeKind::Ident(_)));
        let rhs_ref: &'a Tree<'a> = if !has_type || self.at(TokenKind::Eq) {
            self.accept(TokenKind::Eq);
            if has_type && newmods.is_mutable() && all_idents && self.at(TokenKind::Underscore) {
                // `var x: T = _` requests default initialisation
                self.next();
                newmods.flags |= ModFlags::DEFAULTINIT;
                self.b.alloc(Tree::empty(self.scanner.last_offset()))
            } else {
                let e = self.expr(Location::Local);
                self.b.alloc(e)
            }
        } else {
            newmods.flags |= ModFlags::DEFERRED;
            self.b.alloc(Tree::empty(self.offset()))
        };

        let mut trees = Vec::new();
        for p in lhs {
            let pat = if has_type {
                let range = p.range;
                self.b.at(range, TreeKind::Typed { expr: self.b.alloc(p), tpt: tp_ref })
            } else {
                p
            };
            if newmods.is_lazy() && self.b.match_var_pattern(&pat).is_none() {
                self.syntax_error(pat.range.pos, &messages::PATTERN_DEFINITION_MAY_NOT_BE_LAZY, &[], false);
            }
            let defs = self.b.mk_pat_def(self.r(start), newmods, pat, rhs_ref);
            if newmods.is_deferred() {
                let is_simple_dcl = defs.len() == 1
                    && matches!(defs[0].kind, TreeKind::ValDef { rhs, .. } if rhs.is_empty());
                if is_simple_dcl {
                    if newmods.is_lazy() {
                        let pos = defs[0].range.pos;
                        self.syntax_error(pos, &messages::LAZY_MAY_NOT_BE_ABSTRACT, &[], false);
                    }
                } else {
                    let pos = defs[0].range.pos;
                    self.syntax_error(pos, &messages::PATTERN_DEFINITION_NOT_ABSTRACT, &[], false);
                }
            }
            trees.extend(defs);
        }
        trees
    }

    /// `def name ...` — auxiliary constructors share the keyword with
    /// `this`.
    fn fun_def_or_dcl(&mut self, start: u32, mods: Modifiers<'a>) -> Tree<'a> {
        self.next();
        if self.at(TokenKind::This) {
            self.skip_token();
            let bounds = self.class_context_bounds.clone();
            let ctor_name = self.names.term_of(self.names.std.constructor);
            let vparamss = self.param_clauses(ctor_name, true, false, &bounds, false);
            self.newline_opt_when_followed_by(TokenKind::LBrace);
            let rhs = if self.at(TokenKind::LBrace) {
                let offset = self.offset();
                self.deprecation_warning(offset, &messages::DEPRECATED_PROCEDURE_SYNTAX, &["this"]);
                self.constr_block(&vparamss)
            } else {
                self.accept(TokenKind::Eq);
                self.constr_expr(&vparamss)
            };
            let range = self.r(start);
            let vparamss = self.alloc_vparamss(vparamss);
            self.b.at(
                range,
                TreeKind::DefDef {
                    mods,
                    name: ctor_name,
                    tparams: &[],
                    vparamss,
                    tpt: self.b.alloc(Tree::empty(range.end)),
                    rhs: self.b.alloc(rhs),
                },
            )
        } else {
            let name = self.ident();
            self.fun_def_rest(start, mods, name)
        }
    }

    fn fun_def_rest(&mut self, start: u32, mods: Modifiers<'a>, name: Name) -> Tree<'a> {
        let mut newmods = mods;
        let mut context_bounds: Vec<&'a Tree<'a>> = Vec::new();
        let tparams = self.type_param_clause_opt(false, Some(&mut context_bounds));
        let vparamss = self.param_clauses(name, false, false, &context_bounds, false);
        self.newline_opt_when_followed_by(TokenKind::LBrace);
        let mut restype = self.from_within_return_type(|p| p.typed_opt());
        let rhs;
        if self.is_stat_sep() || self.at(TokenKind::RBrace) {
            if restype.is_empty() {
                let name_str = self.names.display(name);
                let offset = self.scanner.last_offset();
                self.deprecation_warning(offset, &messages::DEPRECATED_PROCEDURE_DECL, &[&name_str]);
                restype = self.unit_type_tree();
            }
            newmods.flags |= ModFlags::DEFERRED;
            rhs = Tree::empty(self.scanner.last_offset());
        } else if restype.is_empty() && self.at(TokenKind::LBrace) {
            let name_str = self.names.display(name);
            let offset = self.offset();
            self.deprecation_warning(offset, &messages::DEPRECATED_PROCEDURE_SYNTAX, &[&name_str]);
            restype = self.unit_type_tree();
            rhs = self.block_expr();
        } else {
            if self.at(TokenKind::Eq) {
                self.next();
                if self.at(TokenKind::Macro) {
                    self.next();
                    newmods.flags |= ModFlags::MACRO;
                }
            } else {
                self.accept(TokenKind::Eq);
            }
            rhs = self.expr(Location::Local);
        }
        let range = self.r(start);
        let vparamss = self.alloc_vparamss(vparamss);
        self.b.at(
            range,
            TreeKind::DefDef {
                mods: newmods,
                name,
                tparams: self.b.alloc_list(tparams),
                vparamss,
                tpt: self.b.alloc(restype),
                rhs: self.b.alloc(rhs),
            },
        )
    }

    fn unit_type_tree(&self) -> Tree<'a> {
        self.b.ident(
            TextRange::empty(self.scanner.last_offset()),
            self.names.type_of(self.names.std.unit_type),
        )
    }

    /// The body of an auxiliary constructor begins with a call to another
    /// constructor.
    fn self_invocation(&mut self, vparamss: &[Vec<Tree<'a>>]) -> Tree<'a> {
        let start = self.accept(TokenKind::This);
        self.newline_opt_when_followed_by(TokenKind::LBrace);
        let ctor = self.b.ident(
            TextRange::empty(start),
            self.names.term_of(self.names.std.constructor),
        );
        let args = self.argument_exprs();
        let mut t = self.b.apply(self.r(start), ctor, args);
        self.newline_opt_when_followed_by(TokenKind::LBrace);
        while self.at(TokenKind::LParen) || self.at(TokenKind::LBrace) {
            let args = self.argument_exprs();
            t = self.b.apply(self.r(start), t, args);
            self.newline_opt_when_followed_by(TokenKind::LBrace);
        }
        if !self.class_context_bounds.is_empty() {
            if let Some(last) = vparamss.last() {
                let args: Vec<Tree<'a>> = last
                    .iter()
                    .filter_map(|p| match p.kind {
                        TreeKind::ValDef { name, .. } => Some(self.b.ident(p.range, name)),
                        _ => None,
                    })
                    .collect();
                t = self.b.apply(self.r(start), t, args);
            }
        }
        t
    }

    fn constr_expr(&mut self, vparamss: &[Vec<Tree<'a>>]) -> Tree<'a> {
        if self.at(TokenKind::LBrace) {
            self.constr_block(vparamss)
        } else {
            let start = self.offset();
            let inv = self.self_invocation(vparamss);
            let unit = self.b.literal_unit(self.scanner.last_offset());
            self.b.mk_block(self.r(start), vec![inv], unit)
        }
    }

    fn constr_block(&mut self, vparamss: &[Vec<Tree<'a>>]) -> Tree<'a> {
        let start = self.skip_token();
        let inv = self.self_invocation(vparamss);
        let mut stats = vec![inv];
        if self.is_stat_sep() {
            self.next();
            stats.extend(self.block_stat_seq());
        }
        self.accept(TokenKind::RBrace);
        let unit = self.b.literal_unit(self.scanner.last_offset());
        self.b.mk_block(self.r(start), stats, unit)
    }

    /// `type T[...] = U`, or an abstract type with bounds.
    fn type_def_or_dcl(&mut self, start: u32, mods: Modifiers<'a>) -> Tree<'a> {
        self.next();
        self.newlines_opt();
        let name = self.ident_for_type();
        let tparams = self.type_param_clause_opt(true, None);
        match self.token() {
            TokenKind::Eq => {
                self.next();
                let rhs = self.typ();
                let range = self.r(start);
                self.b.at(
                    range,
                    TreeKind::TypeDef {
                        mods,
                        name,
                        tparams: self.b.alloc_list(tparams),
                        rhs: self.b.alloc(rhs),
                    },
                )
            }
            t if t == TokenKind::Supertype
                || t == TokenKind::Subtype
                || t == TokenKind::Comma
                || t == TokenKind::RBrace
                || t.is_statement_separator()
                || t == TokenKind::Eof =>
            {
                let bounds = self.type_bounds();
                let range = self.r(start);
                self.b.at(
                    range,
                    TreeKind::TypeDef {
                        mods: mods.and(ModFlags::DEFERRED),
                        name,
                        tparams: self.b.alloc_list(tparams),
                        rhs: self.b.alloc(bounds),
                    },
                )
            }
            _ => {
                self.syntax_error_or_incomplete(&messages::EQ_TYPE_BOUNDS_EXPECTED, &[], true);
                let range = self.r(start);
                self.b.at(
                    range,
                    TreeKind::TypeDef {
                        mods: mods.and(ModFlags::DEFERRED),
                        name,
                        tparams: self.b.alloc_list(tparams),
                        rhs: self.b.alloc(self.error_type_tree()),
                    },
                )
            }
        }
    }

    /// `class | trait | object | case class | case object`.
    fn tmpl_def(&mut self, start: u32, mods: Modifiers<'a>) -> Tree<'a> {
        if mods.is_lazy() {
            let offset = self.offset();
            self.syntax_error(offset, &messages::CLASSES_CANNOT_BE_LAZY, &[], false);
        }
        match self.token() {
            TokenKind::Trait => self.class_def(start, mods.and(ModFlags::TRAIT).and(ModFlags::ABSTRACT)),
            TokenKind::Class => self.class_def(start, mods),
            TokenKind::Object => self.object_def(start, mods, false),
            TokenKind::Case => {
                self.next();
                match self.token() {
                    TokenKind::Class => self.class_def(start, mods.and(ModFlags::CASE)),
                    TokenKind::Object => self.object_def(start, mods.and(ModFlags::CASE), false),
                    _ => {
                        self.syntax_error_or_incomplete(&messages::EXPECTED_CLASS_OR_OBJECT, &[], true);
                        self.error_term_tree()
                    }
                }
            }
            _ => {
                self.syntax_error_or_incomplete(&messages::START_OF_DEFINITION_EXPECTED, &[], true);
                self.error_term_tree()
            }
        }
    }

    fn class_def(&mut self, start: u32, mods: Modifiers<'a>) -> Tree<'a> {
        self.next();
        let name = self.ident_for_type();
        let saved_bounds = std::mem::take(&mut self.class_context_bounds);
        let mut ctx_bounds: Vec<&'a Tree<'a>> = Vec::new();
        let tparams = self.type_param_clause_opt(true, Some(&mut ctx_bounds));
        self.class_context_bounds = ctx_bounds;
        if !self.class_context_bounds.is_empty() && mods.is_trait() {
            let offset = self.offset();
            self.syntax_error(offset, &messages::TRAIT_CONTEXT_BOUNDS, &[], false);
            self.class_context_bounds.clear();
        }
        let constr_annots = if !mods.is_trait() {
            self.constructor_annotations()
        } else {
            Vec::new()
        };
        let (mut constr_mods, vparamss) = if mods.is_trait() {
            (Modifiers::with_flags(ModFlags::TRAIT), None)
        } else {
            let access = self.access_modifier_opt();
            let bounds = self.class_context_bounds.clone();
            let clauses = self.param_clauses(name, false, true, &bounds, mods.is_case());
            (access, Some(clauses))
        };
        if !constr_annots.is_empty() {
            constr_mods.annotations = self.b.alloc_list(constr_annots);
        }
        let mut mods = mods;
        if self.at(TokenKind::Subtype) && mods.is_trait() && self.options.virtual_classes {
            mods.flags |= ModFlags::DEFERRED;
        }
        let template = self.template_opt(mods, name, constr_mods, vparamss, start);
        let result = self.b.at(
            self.r(start),
            TreeKind::ClassDef {
                mods,
                name,
                tparams: self.b.alloc_list(tparams),
                impl_: self.b.alloc(template),
            },
        );
        self.class_context_bounds = saved_bounds;
        result
    }

    fn object_def(&mut self, start: u32, mods: Modifiers<'a>, _is_package_object: bool) -> Tree<'a> {
        self.next();
        let name = self.ident();
        let template = self.template_opt(mods, name, Modifiers::empty(), Some(vec![Vec::new()]), start);
        self.b.at(
            self.r(start),
            TreeKind::ModuleDef {
                mods,
                name,
                impl_: self.b.alloc(template),
            },
        )
    }
}

// ============================================================================
// Templates
// ============================================================================

impl<'a> Parser<'a> {
    /// `Template ::= [EarlyDefs with] Parents [TemplateBody]`. The first
    /// brace body is parsed as ordinary statements; only a following
    /// `with` re-labels them as early definitions.
    fn template(&mut self) -> (Vec<Tree<'a>>, Tree<'a>, Vec<Tree<'a>>) {
        self.newline_opt_when_followed_by(TokenKind::LBrace);
        if self.at(TokenKind::LBrace) {
            let (self_def, body) = self.template_body(true);
            if self.at(TokenKind::With) && self_def.is_empty() {
                let mut early = Vec::new();
                for stat in body {
                    if let Some(e) = self.ensure_early_def(stat) {
                        early.push(e);
                    }
                }
                self.next();
                let parents = self.template_parents();
                let (self1, body1) = self.template_body_opt(false);
                early.extend(body1);
                (parents, self1, early)
            } else {
                (Vec::new(), self_def, body)
            }
        } else {
            let parents = self.template_parents();
            let (self_def, body) = self.template_body_opt(false);
            (parents, self_def, body)
        }
    }

    /// Only concrete vals and types may appear before the parent list.
    fn ensure_early_def(&mut self, t: Tree<'a>) -> Option<Tree<'a>> {
        match t.kind {
            TreeKind::ValDef { mods, name, tpt, rhs } if !mods.is_deferred() => Some(Tree::new(
                t.range,
                TreeKind::ValDef { mods: mods.and(ModFlags::PRESUPER), name, tpt, rhs },
            )),
            TreeKind::TypeDef { mods, name, tparams, rhs } => {
                self.deprecation_warning(t.range.pos, &messages::DEPRECATED_EARLY_TYPE_DEF, &[]);
                Some(Tree::new(
                    t.range,
                    TreeKind::TypeDef { mods: mods.and(ModFlags::PRESUPER), name, tparams, rhs },
                ))
            }
            TreeKind::Empty | TreeKind::Error => None,
            _ => {
                self.syntax_error(t.range.pos, &messages::ONLY_CONCRETE_EARLY_DEFS, &[], false);
                None
            }
        }
    }

    fn template_parents(&mut self) -> Vec<Tree<'a>> {
        let mut parents = Vec::new();
        loop {
            let start = self.offset();
            let parent = self.annot_type(start);
            let applied = if self.at(TokenKind::LParen) {
                let argss = self.multiple_argument_exprs();
                argss
                    .into_iter()
                    .fold(parent, |t, args| self.b.apply(self.r(start), t, args))
            } else {
                parent
            };
            parents.push(applied);
            if self.at(TokenKind::With) {
                self.next();
            } else {
                break;
            }
        }
        parents
    }

    fn template_body(&mut self, is_pre: bool) -> (Tree<'a>, Vec<Tree<'a>>) {
        self.in_braces(|p| p.template_stat_seq(is_pre))
    }

    fn template_body_opt(&mut self, paren_means_syntax_error: bool) -> (Tree<'a>, Vec<Tree<'a>>) {
        self.newline_opt_when_followed_by(TokenKind::LBrace);
        if self.at(TokenKind::LBrace) {
            self.template_body(false)
        } else {
            if self.at(TokenKind::LParen) && paren_means_syntax_error {
                let offset = self.offset();
                self.syntax_error(offset, &messages::TRAIT_PARAMETERS, &[], true);
            }
            (Tree::empty(self.offset()), Vec::new())
        }
    }

    /// `extends Parents Body`, a bare body, or nothing. Units inside the
    /// root package whose name is a primitive value class get a synthetic
    /// nullary constructor.
    fn template_opt(
        &mut self,
        mods: Modifiers<'a>,
        name: Name,
        constr_mods: Modifiers<'a>,
        vparamss: Option<Vec<Vec<Tree<'a>>>>,
        start: u32,
    ) -> Tree<'a> {
        let (parents, self_def, body) =
            if self.at(TokenKind::Extends) || (self.at(TokenKind::Subtype) && mods.is_trait()) {
                if self.at(TokenKind::Subtype) && !self.options.virtual_classes {
                    let offset = self.offset();
                    self.syntax_error(
                        offset,
                        &messages::EXPECTED_BUT_FOUND,
                        &["extends", "<:"],
                        false,
                    );
                }
                self.next();
                self.template()
            } else {
                self.newline_opt_when_followed_by(TokenKind::LBrace);
                let (self_def, body) =
                    self.template_body_opt(mods.is_trait() || name.is_term());
                (Vec::new(), self_def, body)
            };

        if self.in_root_package && self.names.is_primitive_value_class(name) {
            let empty_params = self.alloc_vparamss(vec![Vec::new()]);
            let ctor = self.b.mk_primary_constructor(start, Modifiers::empty(), empty_params);
            let mut full = vec![ctor];
            full.extend(body);
            let range = self.r(start);
            let parents = self.b.alloc_list(parents);
            let body = self.b.alloc_list(full);
            let self_def = self.b.alloc(self_def);
            return self.b.at(range, TreeKind::Template { parents, self_def, body });
        }

        let parents = self.b.mk_parents(mods, parents, self.offset());
        let vparamss = vparamss.map(|v| self.alloc_vparamss(v));
        self.b
            .mk_template(self.r(start), parents, self_def, constr_mods, vparamss, body)
    }

    /// Template statements, with the self-type declaration handled by
    /// re-interpreting a leading expression followed by `=>`.
    fn template_stat_seq(&mut self, _is_pre: bool) -> (Tree<'a>, Vec<Tree<'a>>) {
        let mut self_def = Tree::empty(self.offset());
        let mut stats = Vec::new();
        if self.is_expr_intro() {
            let first = self.check_no_escaping_placeholders(|p| p.expr(Location::InTemplate));
            if self.at(TokenKind::Arrow) {
                match first.kind {
                    TreeKind::Typed { expr, tpt } if expr.is_bare_this(self.names.type_of(self.names.std.empty)) => {
                        self_def = self.b.mk_self_def(first.range, self.names.wildcard(), (*tpt).clone());
                    }
                    _ => {
                        let param = self.convert_to_param(first);
                        if let TreeKind::ValDef { name, tpt, rhs, .. } = param.kind {
                            if name.text != self.names.std.error && rhs.is_empty() {
                                self_def = self.b.mk_self_def(param.range, name, (*tpt).clone());
                            }
                        }
                    }
                }
                self.next();
            } else {
                stats.push(first);
                self.accept_stat_sep_opt();
            }
        }
        stats.extend(self.template_stats());
        (self_def, stats)
    }

    fn template_stats(&mut self) -> Vec<Tree<'a>> {
        let mut stats = Vec::new();
        while !self.is_stat_seq_end() {
            if self.at(TokenKind::Import) {
                stats.extend(self.import_clause());
            } else if self.is_def_intro() || self.token().is_modifier() || self.is_annotation_intro() {
                stats.extend(self.non_local_def_or_dcl());
            } else if self.is_expr_intro() {
                stats.push(self.statement(Location::InTemplate));
            } else if !self.is_stat_sep() {
                self.syntax_error_or_incomplete(&messages::ILLEGAL_START_OF_DEFINITION, &[], true);
            }
            self.accept_stat_sep_opt();
        }
        stats
    }

    /// A refinement body: declarations only.
    fn refinement(&mut self) -> Vec<Tree<'a>> {
        self.in_braces(|p| p.refine_stat_seq())
    }

    fn refine_stat_seq(&mut self) -> Vec<Tree<'a>> {
        self.check_no_escaping_placeholders(|p| {
            let mut stats = Vec::new();
            while !p.is_stat_seq_end() {
                if p.is_dcl_intro() {
                    let start = p.offset();
                    stats.extend(p.def_or_dcl(start, Modifiers::empty()));
                } else if !p.is_stat_sep() {
                    let msg = if p.in_fun_return_type {
                        &messages::ILLEGAL_START_OF_DECLARATION_HINT
                    } else {
                        &messages::ILLEGAL_START_OF_DECLARATION
                    };
                    p.syntax_error_or_incomplete(msg, &[], true);
                }
                if !p.at(TokenKind::RBrace) {
                    p.accept_stat_sep();
                }
            }
            stats
        })
    }
}

// ============================================================================
// Imports
// ============================================================================

impl<'a> Parser<'a> {
    fn import_clause(&mut self) -> Vec<Tree<'a>> {
        self.accept(TokenKind::Import);
        self.comma_separated(|p| p.import_expr())
    }

    /// Walk `a.b.c` selectors until a wildcard, a selector list, or a
    /// trailing simple identifier.
    fn import_expr(&mut self) -> Tree<'a> {
        let start = self.offset();
        let base = if self.at(TokenKind::This) {
            self.this_dotted(start, self.names.type_of(self.names.std.empty))
        } else {
            let name = self.ident();
            let id = self.b.ident(self.r(start), name);
            self.accept(TokenKind::Dot);
            if self.at(TokenKind::This) {
                self.this_dotted(start, name.to_type())
            } else {
                id
            }
        };
        self.import_expr_rest(start, base)
    }

    fn this_dotted(&mut self, start: u32, qual: Name) -> Tree<'a> {
        self.next();
        let t = self.b.at(self.r(start), TreeKind::This(qual));
        self.accept(TokenKind::Dot);
        let result = self.selector(t, start);
        self.accept(TokenKind::Dot);
        result
    }

    fn import_expr_rest(&mut self, start: u32, expr: Tree<'a>) -> Tree<'a> {
        let selectors = match self.token() {
            TokenKind::Underscore => vec![self.import_selector()],
            TokenKind::LBrace => self.import_selectors(),
            _ => {
                let name_offset = self.offset();
                let name = self.ident();
                if self.at(TokenKind::Dot) {
                    let t = self.b.select(self.r(start), expr, name);
                    self.next();
                    return self.import_expr_rest(start, t);
                }
                vec![ImportSelector {
                    name,
                    name_offset,
                    rename: Some(name),
                    rename_offset: name_offset,
                }]
            }
        };
        let range = self.r(start);
        let expr = self.b.alloc(expr);
        let selectors = self.b.alloc_selectors(selectors);
        self.b.at(range, TreeKind::Import { expr, selectors })
    }

    fn import_selectors(&mut self) -> Vec<ImportSelector> {
        let selectors = self.in_braces(|p| p.comma_separated(|p2| p2.import_selector()));
        if selectors.len() > 1 {
            for s in &selectors[..selectors.len() - 1] {
                if self.names.is_wildcard(s.name) {
                    self.syntax_error(s.name_offset, &messages::WILDCARD_MUST_BE_LAST_IMPORT, &[], false);
                }
            }
        }
        selectors
    }

    fn import_selector(&mut self) -> ImportSelector {
        let name_offset = self.offset();
        let name = self.wildcard_or_ident();
        match self.token() {
            TokenKind::Arrow => {
                self.next();
                let rename_offset = self.offset();
                let rename = self.wildcard_or_ident();
                ImportSelector { name, name_offset, rename: Some(rename), rename_offset }
            }
            _ if self.names.is_wildcard(name) => ImportSelector {
                name,
                name_offset,
                rename: None,
                rename_offset: name_offset,
            },
            _ => ImportSelector {
                name,
                name_offset,
                rename: Some(name),
                rename_offset: name_offset,
            },
        }
    }
}

// ============================================================================
// Top level
// ============================================================================

impl<'a> Parser<'a> {
    fn compilation_unit(&mut self) -> Tree<'a> {
        let start = self.offset();
        let mut stats = self.top_stats();
        if stats.len() == 1 && matches!(stats[0].kind, TreeKind::PackageDef { .. }) {
            stats.pop().unwrap()
        } else {
            self.b.mk_empty_package(self.r(start), stats)
        }
    }

    fn top_stats(&mut self) -> Vec<Tree<'a>> {
        let mut ts = Vec::new();
        while self.at(TokenKind::Semi) {
            self.next();
        }
        let start = self.offset();
        if self.at(TokenKind::Package) {
            self.next();
            if self.at(TokenKind::Object) {
                ts.push(self.package_object_def(start));
                if !self.at(TokenKind::Eof) {
                    self.accept_stat_sep();
                    ts.extend(self.top_stat_seq());
                }
            } else {
                let pkg = self.pkg_qual_id();
                if self.at(TokenKind::Eof) {
                    ts.push(self.b.mk_packaging(self.r(start), pkg, Vec::new()));
                } else if self.is_stat_sep() {
                    self.next();
                    let inner = self.top_stats();
                    ts.push(self.b.mk_packaging(self.r(start), pkg, inner));
                } else {
                    let stats = self.in_braces(|p| p.top_stat_seq());
                    ts.push(self.b.mk_packaging(self.r(start), pkg, stats));
                    self.accept_stat_sep_opt();
                    ts.extend(self.top_stat_seq());
                }
            }
        } else {
            ts.extend(self.top_stat_seq());
        }
        ts
    }

    /// Track whether the unit sits directly inside the root language
    /// package; the primitive value-class templates depend on it.
    fn pkg_qual_id(&mut self) -> Tree<'a> {
        let pkg = self.qual_id();
        let single = match pkg.kind {
            TreeKind::Ident(n) => Some(n),
            _ => None,
        };
        self.in_root_package = self.current_package.is_empty()
            && single.map_or(false, |n| n.text == self.names.std.fjord_pkg);
        let rendered = self.render_path(&pkg);
        if self.current_package.is_empty() {
            self.current_package = rendered;
        } else {
            self.current_package.push('.');
            self.current_package.push_str(&rendered);
            self.in_root_package = false;
        }
        self.newline_opt_when_followed_by(TokenKind::LBrace);
        pkg
    }

    fn render_path(&self, t: &Tree<'a>) -> String {
        match t.kind {
            TreeKind::Ident(n) => self.names.display(n),
            TreeKind::Select { qualifier, name } => {
                format!("{}.{}", self.render_path(qualifier), self.names.display(name))
            }
            _ => String::new(),
        }
    }

    fn package_object_def(&mut self, start: u32) -> Tree<'a> {
        let ostart = self.offset();
        let module = self.object_def(ostart, Modifiers::empty(), true);
        self.b.mk_package_object(self.r(start), module)
    }

    fn package_or_package_object(&mut self, start: u32) -> Tree<'a> {
        if self.at(TokenKind::Object) {
            self.package_object_def(start)
        } else {
            self.packaging(start)
        }
    }

    fn packaging(&mut self, start: u32) -> Tree<'a> {
        let pkg = self.pkg_qual_id();
        let stats = if self.at(TokenKind::LBrace) {
            self.in_braces(|p| p.top_stat_seq())
        } else {
            Vec::new()
        };
        self.b.mk_packaging(self.r(start), pkg, stats)
    }

    fn top_stat_seq(&mut self) -> Vec<Tree<'a>> {
        let mut ts = Vec::new();
        while !self.is_stat_seq_end() {
            match self.token() {
                TokenKind::Package => {
                    let start = self.skip_token();
                    ts.push(self.package_or_package_object(start));
                }
                TokenKind::Import => ts.extend(self.import_clause()),
                _ if self.is_annotation_intro()
                    || self.token().is_template_intro()
                    || self.token().is_modifier() =>
                {
                    let start = self.offset();
                    let annots = self.annotations(true);
                    let mut mods = self.modifiers();
                    if !annots.is_empty() {
                        mods.annotations = self.b.alloc_list(annots);
                    }
                    ts.push(self.tmpl_def(start, mods));
                }
                _ => {
                    if !self.is_stat_sep() {
                        self.syntax_error_or_incomplete(&messages::EXPECTED_CLASS_OR_OBJECT, &[], true);
                    }
                }
            }
            self.accept_stat_sep_opt();
        }
        ts
    }

    fn template_or_top_stat_seq(&mut self) -> Vec<Tree<'a>> {
        let mut stats = Vec::new();
        while !self.is_stat_seq_end() {
            if self.at(TokenKind::Package) {
                let start = self.skip_token();
                stats.push(self.package_or_package_object(start));
            } else if self.at(TokenKind::Import) {
                stats.extend(self.import_clause());
            } else if self.is_def_intro() || self.token().is_modifier() || self.is_annotation_intro() {
                stats.extend(self.non_local_def_or_dcl());
            } else if self.is_expr_intro() {
                stats.push(self.statement(Location::InTemplate));
            } else if !self.is_stat_sep() {
                self.syntax_error_or_incomplete(&messages::ILLEGAL_START_OF_STATEMENT, &[], true);
            }
            self.accept_stat_sep_opt();
        }
        stats
    }
}
