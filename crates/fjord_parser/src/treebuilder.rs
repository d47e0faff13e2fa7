//! Tree construction and desugaring helpers.
//!
//! The parser rewrites surface syntax to canonical tree forms as it goes;
//! everything that builds more than a single node lives here: binop
//! shapes, tuple makers, while/do-while labels, catch-from-expression,
//! pattern definitions, closures, for-comprehensions, templates, and
//! packagings.

use bumpalo::Bump;
use fjord_ast::modifiers::{ModFlags, Modifiers};
use fjord_ast::name::{Name, Names};
use fjord_ast::tree::{Constant, Tree, TreeKind};
use fjord_core::text::TextRange;

/// Move a `Vec` into the arena as a slice.
///
/// Uses ManuallyDrop to prevent double-free on panic inside
/// alloc_slice_fill_with.
pub(crate) fn alloc_vec_in<'a, T>(arena: &'a Bump, vec: Vec<T>) -> &'a [T] {
    if vec.is_empty() {
        return &[];
    }
    let mut vec = std::mem::ManuallyDrop::new(vec);
    let len = vec.len();
    let ptr = vec.as_ptr();
    let slice = arena.alloc_slice_fill_with(len, |i| {
        // SAFETY: i < len, and each element is read exactly once.
        // ManuallyDrop prevents the Vec destructor from running, so elements
        // won't be double-freed even if this closure panics partway through.
        unsafe { std::ptr::read(ptr.add(i)) }
    });
    unsafe {
        vec.set_len(0);
    }
    slice
}

/// One enumerator of a for-comprehension, before desugaring.
#[derive(Clone)]
pub enum Enumerator<'a> {
    /// `pat <- rhs`
    ValFrom { pat: Tree<'a>, rhs: Tree<'a> },
    /// `pat = rhs`
    ValEq { pat: Tree<'a>, rhs: Tree<'a> },
    /// `if test`
    Filter { test: Tree<'a> },
}

/// The body of a for-comprehension: with or without `yield`.
pub enum ForBody<'a> {
    Yield(Tree<'a>),
    NoYield(Tree<'a>),
}

/// Builds and desugars trees. Owns nothing; allocates into the shared
/// arena and draws fresh names from the shared name table.
pub struct TreeBuilder<'a> {
    arena: &'a Bump,
    names: &'a Names,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(arena: &'a Bump, names: &'a Names) -> Self {
        Self { arena, names }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    #[inline]
    pub fn alloc(&self, tree: Tree<'a>) -> &'a Tree<'a> {
        self.arena.alloc(tree)
    }

    #[inline]
    pub fn alloc_list(&self, trees: Vec<Tree<'a>>) -> &'a [Tree<'a>] {
        alloc_vec_in(self.arena, trees)
    }

    #[inline]
    pub fn alloc_param_lists(&self, lists: Vec<&'a [Tree<'a>]>) -> &'a [&'a [Tree<'a>]] {
        self.arena.alloc_slice_copy(&lists)
    }

    #[inline]
    pub fn alloc_selectors(
        &self,
        selectors: Vec<fjord_ast::tree::ImportSelector>,
    ) -> &'a [fjord_ast::tree::ImportSelector] {
        self.arena.alloc_slice_copy(&selectors)
    }

    #[inline]
    pub fn at(&self, range: TextRange, kind: TreeKind<'a>) -> Tree<'a> {
        Tree::new(range, kind)
    }

    // ========================================================================
    // Leaves
    // ========================================================================

    pub fn ident(&self, range: TextRange, name: Name) -> Tree<'a> {
        self.at(range, TreeKind::Ident(name))
    }

    pub fn select(&self, range: TextRange, qualifier: Tree<'a>, name: Name) -> Tree<'a> {
        let qualifier = self.alloc(qualifier);
        self.at(range, TreeKind::Select { qualifier, name })
    }

    pub fn apply(&self, range: TextRange, fun: Tree<'a>, args: Vec<Tree<'a>>) -> Tree<'a> {
        let fun = self.alloc(fun);
        let args = self.alloc_list(args);
        self.at(range, TreeKind::Apply { fun, args })
    }

    pub fn literal_unit(&self, pos: u32) -> Tree<'a> {
        self.at(TextRange::empty(pos), TreeKind::Literal(Constant::Unit))
    }

    pub fn error_tree(&self, pos: u32) -> Tree<'a> {
        self.at(TextRange::empty(pos), TreeKind::Error)
    }

    /// An `Ident` in the term namespace for the wildcard.
    pub fn wildcard_ident(&self, range: TextRange) -> Tree<'a> {
        self.ident(range, self.names.wildcard())
    }

    // ========================================================================
    // Parens, tuples, type conversion
    // ========================================================================

    /// Commit a `Parens` node to a value: `()` is unit, `(e)` is `e`, and
    /// `(a, b, ...)` is a tuple.
    pub fn strip_parens(&self, t: Tree<'a>) -> Tree<'a> {
        match t.kind {
            TreeKind::Parens(ts) => match ts.len() {
                0 => self.at(t.range, TreeKind::Literal(Constant::Unit)),
                1 => {
                    let mut inner = ts[0].clone();
                    inner.range = t.range;
                    inner
                }
                _ => self.mk_tuple_term(t.range, ts.to_vec()),
            },
            _ => t,
        }
    }

    /// `TupleN(e1, ..., eN)` — also the constructor-pattern shape.
    pub fn mk_tuple_term(&self, range: TextRange, elems: Vec<Tree<'a>>) -> Tree<'a> {
        match elems.len() {
            0 => self.at(range, TreeKind::Literal(Constant::Unit)),
            1 => elems.into_iter().next().unwrap(),
            n => {
                let fun = self.ident(TextRange::empty(range.pos), self.names.tuple_type(n).to_term());
                self.apply(range, fun, elems)
            }
        }
    }

    /// `TupleN[T1, ..., TN]` applied type.
    pub fn mk_tuple_type(&self, range: TextRange, elems: Vec<Tree<'a>>) -> Tree<'a> {
        match elems.len() {
            0 => self.ident(range, self.names.type_of(self.names.std.unit_type)),
            1 => elems.into_iter().next().unwrap(),
            n => {
                let tpt = self.alloc(self.ident(TextRange::empty(range.pos), self.names.tuple_type(n)));
                let args = self.alloc_list(elems);
                self.at(range, TreeKind::AppliedType { tpt, args })
            }
        }
    }

    /// `FunctionN[T1, ..., TN, R]` applied type.
    pub fn mk_function_type(&self, range: TextRange, args: Vec<Tree<'a>>, result: Tree<'a>) -> Tree<'a> {
        let arity = args.len();
        let tpt = self.alloc(self.ident(TextRange::empty(range.pos), self.names.function_type(arity)));
        let mut all = args;
        all.push(result);
        let args = self.alloc_list(all);
        self.at(range, TreeKind::AppliedType { tpt, args })
    }

    /// Reinterpret a path parsed in term space as a type tree.
    pub fn convert_to_type_id(&self, t: Tree<'a>) -> Tree<'a> {
        match t.kind {
            TreeKind::Ident(name) => self.at(t.range, TreeKind::Ident(name.to_type())),
            TreeKind::Select { qualifier, name } => self.at(
                t.range,
                TreeKind::Select {
                    qualifier,
                    name: name.to_type(),
                },
            ),
            _ => t,
        }
    }

    // ========================================================================
    // Binops and postfix
    // ========================================================================

    /// Build one infix application. Grouping has already been decided by
    /// the reduction loop, so both associativities produce
    /// `lhs.op(args)` in expressions and `op(lhs, args...)` in patterns.
    pub fn mk_binop(
        &self,
        is_expr: bool,
        left: Tree<'a>,
        operator: Name,
        op_offset: u32,
        targs: Vec<Tree<'a>>,
        right: Tree<'a>,
    ) -> Tree<'a> {
        let range = left.range.union(right.range);
        let mut arguments = match right.kind {
            TreeKind::Parens(ts) => {
                let ts: Vec<Tree<'a>> = ts.to_vec();
                if is_expr {
                    ts.into_iter().map(|t| self.assignment_to_named_arg(t)).collect()
                } else {
                    ts
                }
            }
            _ => vec![right],
        };
        if is_expr {
            let left = self.strip_parens(left);
            let op_range = TextRange::new(left.range.pos, op_offset + 1);
            let sel = self.select(op_range, left, operator);
            let fun = if targs.is_empty() {
                sel
            } else {
                let fun = self.alloc(sel);
                let args = self.alloc_list(targs);
                self.at(op_range, TreeKind::TypeApply { fun, args })
            };
            self.apply(range, fun, arguments)
        } else {
            let fun = self.ident(TextRange::empty(op_offset), operator);
            let mut args = vec![self.strip_parens(left)];
            args.append(&mut arguments);
            self.apply(range, fun, args)
        }
    }

    /// A trailing operator without a right operand is a plain selection.
    pub fn mk_postfix_select(&self, start: u32, op_end: u32, operand: Tree<'a>, name: Name) -> Tree<'a> {
        let operand = self.strip_parens(operand);
        self.select(TextRange::new(start, op_end), operand, name)
    }

    /// `name = rhs` in argument position is a named argument.
    pub fn assignment_to_named_arg(&self, t: Tree<'a>) -> Tree<'a> {
        match t.kind {
            TreeKind::Assign { lhs, rhs } if matches!(lhs.kind, TreeKind::Ident(_)) => {
                self.at(t.range, TreeKind::NamedArg { lhs, rhs })
            }
            _ => t,
        }
    }

    // ========================================================================
    // Synthetic parameters and self
    // ========================================================================

    /// The synthetic value parameter behind a `_` placeholder.
    pub fn mk_synthetic_param(&self, offset: u32, name: Name) -> Tree<'a> {
        let range = TextRange::empty(offset);
        let empty = self.alloc(Tree::empty(offset));
        self.at(
            range,
            TreeKind::ValDef {
                mods: Modifiers::with_flags(ModFlags::PARAM | ModFlags::SYNTHETIC),
                name,
                tpt: empty,
                rhs: empty,
            },
        )
    }

    /// The synthetic type parameter behind a `_` wildcard type.
    pub fn mk_synthetic_type_param(&self, range: TextRange, name: Name, bounds: Tree<'a>) -> Tree<'a> {
        let bounds = self.alloc(bounds);
        self.at(
            range,
            TreeKind::TypeDef {
                mods: Modifiers::with_flags(ModFlags::PARAM | ModFlags::SYNTHETIC | ModFlags::DEFERRED),
                name,
                tparams: &[],
                rhs: bounds,
            },
        )
    }

    pub fn mk_self_def(&self, range: TextRange, name: Name, tpt: Tree<'a>) -> Tree<'a> {
        let tpt = self.alloc(tpt);
        let rhs = self.alloc(Tree::empty(range.end));
        self.at(
            range,
            TreeKind::ValDef {
                mods: Modifiers::with_flags(ModFlags::PRIVATE),
                name,
                tpt,
                rhs,
            },
        )
    }

    // ========================================================================
    // Loops and try
    // ========================================================================

    /// `while (cond) body` becomes a labelled loop:
    /// `label$n: if (cond) { body; label$n() } else ()`.
    pub fn make_while(&self, range: TextRange, label: Name, cond: Tree<'a>, body: Tree<'a>) -> Tree<'a> {
        let end = body.range.end;
        let continu = self.apply(TextRange::empty(end), self.ident(TextRange::empty(end), label), vec![]);
        let block = self.mk_block(body.range, vec![body], continu);
        let cond = self.alloc(cond);
        let then_part = self.alloc(block);
        let else_part = self.alloc(self.literal_unit(end));
        let rhs = self.at(range, TreeKind::If { cond, then_part, else_part });
        let body = self.alloc(rhs);
        self.at(range, TreeKind::LabelDef { name: label, body })
    }

    /// `do body while (cond)` becomes
    /// `label$n: { body; if (cond) label$n() else () }`.
    pub fn make_do_while(&self, range: TextRange, label: Name, body: Tree<'a>, cond: Tree<'a>) -> Tree<'a> {
        let end = cond.range.end;
        let continu = self.apply(TextRange::empty(end), self.ident(TextRange::empty(end), label), vec![]);
        let cond = self.alloc(cond);
        let then_part = self.alloc(continu);
        let else_part = self.alloc(self.literal_unit(end));
        let if_tree = self.at(range, TreeKind::If { cond, then_part, else_part });
        let block = self.mk_block(range, vec![body], if_tree);
        let body = self.alloc(block);
        self.at(range, TreeKind::LabelDef { name: label, body })
    }

    /// `catch expr` wraps the handler expression into one synthetic case:
    /// `case x$n: Throwable => { val catchExpr$n = expr; catchExpr$n.apply(x$n) }`.
    pub fn make_catch_from_expr(&self, handler: Tree<'a>) -> Tree<'a> {
        let range = handler.range;
        let binder = self.names.fresh_term_name("x$");
        let fn_name = self.names.fresh_term_name("catchExpr$");
        let throwable = self.ident(range, self.names.type_of(self.names.std.throwable));
        let wild = self.alloc(self.wildcard_ident(TextRange::empty(range.pos)));
        let typed = self.at(
            range,
            TreeKind::Typed {
                expr: wild,
                tpt: self.alloc(throwable),
            },
        );
        let pat = self.at(
            range,
            TreeKind::Bind {
                name: binder,
                body: self.alloc(typed),
            },
        );
        let fn_def = self.at(
            range,
            TreeKind::ValDef {
                mods: Modifiers::with_flags(ModFlags::SYNTHETIC),
                name: fn_name,
                tpt: self.alloc(Tree::empty(range.pos)),
                rhs: self.alloc(handler),
            },
        );
        let call = self.apply(
            range,
            self.select(
                range,
                self.ident(range, fn_name),
                self.names.term_of(self.names.std.apply),
            ),
            vec![self.ident(range, binder)],
        );
        let body = self.mk_block(range, vec![fn_def], call);
        self.mk_case_def(range, pat, Tree::empty(range.pos), body)
    }

    // ========================================================================
    // Blocks, cases, visitors
    // ========================================================================

    /// A block whose result is `expr`; statements that are definitions get
    /// a unit result appended by the caller passing `expr` as unit.
    pub fn mk_block(&self, range: TextRange, stats: Vec<Tree<'a>>, expr: Tree<'a>) -> Tree<'a> {
        let stats = self.alloc_list(stats);
        let expr = self.alloc(expr);
        self.at(range, TreeKind::Block { stats, expr })
    }

    pub fn mk_case_def(&self, range: TextRange, pat: Tree<'a>, guard: Tree<'a>, body: Tree<'a>) -> Tree<'a> {
        let pat = self.alloc(pat);
        let guard = self.alloc(guard);
        let body = self.alloc(body);
        self.at(range, TreeKind::CaseDef { pat, guard, body })
    }

    /// An anonymous partial function `{ case ... }`: a `Match` with an
    /// empty selector.
    pub fn mk_visitor(&self, range: TextRange, cases: Vec<Tree<'a>>) -> Tree<'a> {
        let selector = self.alloc(Tree::empty(range.pos));
        let cases = self.alloc_list(cases);
        self.at(range, TreeKind::Match { selector, cases })
    }

    // ========================================================================
    // Pattern analysis
    // ========================================================================

    /// A "variable pattern" binds one name with an optional ascription:
    /// `x` or `x: T` (including the wildcard).
    pub fn match_var_pattern(&self, pat: &Tree<'a>) -> Option<(Name, Option<&'a Tree<'a>>)> {
        match pat.kind {
            TreeKind::Ident(name) if self.names.starts_with_lower(name) => Some((name, None)),
            TreeKind::Typed { expr, tpt } => match expr.kind {
                TreeKind::Ident(name) if self.names.starts_with_lower(name) => Some((name, Some(tpt))),
                _ => None,
            },
            _ => None,
        }
    }

    /// Rewrite pattern variables to explicit `Bind`s: `x` becomes
    /// `x @ _`, and `x: T` becomes `x @ (_: T)`. Constructor arguments
    /// are rewritten recursively; stable identifiers are left alone.
    pub fn transform_patvars(&self, pat: Tree<'a>) -> Tree<'a> {
        let range = pat.range;
        match pat.kind {
            TreeKind::Ident(name)
                if self.names.starts_with_lower(name) && !self.names.is_wildcard(name)
                    && !self.names.is_operator_name(name) =>
            {
                let body = self.alloc(self.wildcard_ident(TextRange::empty(range.end)));
                self.at(range, TreeKind::Bind { name, body })
            }
            TreeKind::Typed { expr, tpt } => match expr.kind {
                TreeKind::Ident(name)
                    if self.names.starts_with_lower(name) && !self.names.is_wildcard(name) =>
                {
                    let wild = self.alloc(self.wildcard_ident(TextRange::empty(range.pos)));
                    let typed = self.alloc(self.at(range, TreeKind::Typed { expr: wild, tpt }));
                    self.at(range, TreeKind::Bind { name, body: typed })
                }
                _ => {
                    let inner = self.transform_patvars(expr.clone());
                    self.at(range, TreeKind::Typed { expr: self.alloc(inner), tpt })
                }
            },
            TreeKind::Apply { fun, args } => {
                let args = args.iter().map(|a| self.transform_patvars(a.clone())).collect();
                self.at(range, TreeKind::Apply { fun, args: self.alloc_list(args) })
            }
            TreeKind::Bind { name, body } => {
                let body = self.alloc(self.transform_patvars(body.clone()));
                self.at(range, TreeKind::Bind { name, body })
            }
            TreeKind::Alternative(ts) => {
                let ts = ts.iter().map(|t| self.transform_patvars(t.clone())).collect();
                self.at(range, TreeKind::Alternative(self.alloc_list(ts)))
            }
            TreeKind::Star(t) => {
                let t = self.alloc(self.transform_patvars(t.clone()));
                self.at(range, TreeKind::Star(t))
            }
            TreeKind::Parens(ts) => {
                let ts = ts.iter().map(|t| self.transform_patvars(t.clone())).collect();
                self.at(range, TreeKind::Parens(self.alloc_list(ts)))
            }
            _ => pat,
        }
    }

    /// The names bound by a pattern, in source order. Call after
    /// `transform_patvars` so every variable is a `Bind`.
    pub fn get_variables(&self, pat: &Tree<'a>, out: &mut Vec<(Name, TextRange)>) {
        match pat.kind {
            TreeKind::Bind { name, body } => {
                if !self.names.is_wildcard(name) {
                    out.push((name, pat.range));
                }
                self.get_variables(body, out);
            }
            TreeKind::Apply { args, .. } => {
                for a in args {
                    self.get_variables(a, out);
                }
            }
            TreeKind::Typed { expr, .. } => self.get_variables(expr, out),
            TreeKind::Alternative(ts) | TreeKind::Parens(ts) => {
                for t in ts {
                    self.get_variables(t, out);
                }
            }
            TreeKind::Star(t) => self.get_variables(t, out),
            _ => {}
        }
    }

    // ========================================================================
    // Pattern definitions
    // ========================================================================

    /// Desugar `val/var pat = rhs`.
    ///
    /// A variable pattern stays a plain `ValDef`. Otherwise:
    /// - zero binders: `rhs match { case pat => () }`
    /// - one binder x: `val x = rhs match { case pat => x }`
    /// - N binders:    a synthetic tuple val plus N accessor vals.
    pub fn mk_pat_def(
        &self,
        range: TextRange,
        mods: Modifiers<'a>,
        pat: Tree<'a>,
        rhs: &'a Tree<'a>,
    ) -> Vec<Tree<'a>> {
        if let Some((name, tpt)) = self.match_var_pattern(&pat) {
            let tpt = tpt.unwrap_or_else(|| self.alloc(Tree::empty(pat.range.end)));
            return vec![self.at(range, TreeKind::ValDef { mods, name, tpt, rhs })];
        }

        let pat1 = self.transform_patvars(pat);
        let mut vars = Vec::new();
        self.get_variables(&pat1, &mut vars);

        let make_match = |result: Tree<'a>| -> Tree<'a> {
            let case = self.mk_case_def(pat1.range, pat1.clone(), Tree::empty(range.pos), result);
            let cases = self.alloc_list(vec![case]);
            self.at(range, TreeKind::Match { selector: rhs, cases })
        };

        match vars.len() {
            0 => vec![make_match(self.literal_unit(range.end))],
            1 => {
                let (name, vrange) = vars[0];
                let matched = make_match(self.ident(vrange, name));
                let tpt = self.alloc(Tree::empty(vrange.end));
                vec![self.at(
                    range,
                    TreeKind::ValDef {
                        mods,
                        name,
                        tpt,
                        rhs: self.alloc(matched),
                    },
                )]
            }
            _ => {
                let ids = vars.iter().map(|&(n, r)| self.ident(r, n)).collect();
                let matched = make_match(self.mk_tuple_term(range, ids));
                let tmp = self.names.fresh_term_name("x$");
                let tmp_mods = Modifiers {
                    flags: ModFlags::PRIVATE | ModFlags::SYNTHETIC | (mods.flags & ModFlags::LAZY),
                    priv_within: None,
                    annotations: &[],
                };
                let empty = self.alloc(Tree::empty(range.pos));
                let mut defs = vec![self.at(
                    range,
                    TreeKind::ValDef {
                        mods: tmp_mods,
                        name: tmp,
                        tpt: empty,
                        rhs: self.alloc(matched),
                    },
                )];
                for (i, &(name, vrange)) in vars.iter().enumerate() {
                    let accessor = self.select(
                        vrange,
                        self.ident(vrange, tmp),
                        self.names.tuple_field(i + 1),
                    );
                    defs.push(self.at(
                        vrange,
                        TreeKind::ValDef {
                            mods,
                            name,
                            tpt: self.alloc(Tree::empty(vrange.end)),
                            rhs: self.alloc(accessor),
                        },
                    ));
                }
                defs
            }
        }
    }

    // ========================================================================
    // For-comprehensions
    // ========================================================================

    pub fn mk_generator(&self, pat: Tree<'a>, has_eq: bool, rhs: Tree<'a>) -> Enumerator<'a> {
        let pat = self.transform_patvars(pat);
        if has_eq {
            Enumerator::ValEq { pat, rhs }
        } else {
            Enumerator::ValFrom { pat, rhs }
        }
    }

    pub fn mk_filter(&self, test: Tree<'a>) -> Enumerator<'a> {
        Enumerator::Filter { test }
    }

    /// `qual.meth { pat => body }`; a variable pattern becomes a plain
    /// function literal, anything else a visitor.
    fn mk_combination(&self, meth: Name, qual: Tree<'a>, pat: Tree<'a>, body: Tree<'a>) -> Tree<'a> {
        let range = qual.range.union(body.range);
        let closure = self.mk_closure(pat, body);
        let fun = self.select(qual.range, qual, meth);
        self.apply(range, fun, vec![closure])
    }

    fn mk_closure(&self, pat: Tree<'a>, body: Tree<'a>) -> Tree<'a> {
        let range = pat.range.union(body.range);
        match self.closure_param(&pat) {
            Some(param) => {
                let params = self.alloc_list(vec![param]);
                self.at(range, TreeKind::Function { params, body: self.alloc(body) })
            }
            None => {
                let case = self.mk_case_def(range, pat, Tree::empty(range.pos), body);
                self.mk_visitor(range, vec![case])
            }
        }
    }

    /// A closure parameter for a variable pattern, after patvar transform:
    /// `x @ _`, `x @ (_: T)`, or a bare wildcard.
    fn closure_param(&self, pat: &Tree<'a>) -> Option<Tree<'a>> {
        let (name, tpt) = match pat.kind {
            TreeKind::Bind { name, body } => match body.kind {
                TreeKind::Ident(w) if self.names.is_wildcard(w) => (name, None),
                TreeKind::Typed { expr, tpt } => match expr.kind {
                    TreeKind::Ident(w) if self.names.is_wildcard(w) => (name, Some(tpt)),
                    _ => return None,
                },
                _ => return None,
            },
            TreeKind::Ident(name) if self.names.is_wildcard(name) => (name, None),
            _ => return None,
        };
        let tpt = tpt.unwrap_or_else(|| self.alloc(Tree::empty(pat.range.end)));
        let rhs = self.alloc(Tree::empty(pat.range.end));
        Some(self.at(
            pat.range,
            TreeKind::ValDef {
                mods: Modifiers::with_flags(ModFlags::PARAM),
                name,
                tpt,
                rhs,
            },
        ))
    }

    fn make_bind(&self, pat: Tree<'a>) -> Tree<'a> {
        match pat.kind {
            TreeKind::Bind { .. } => pat,
            _ => {
                let range = pat.range;
                let name = self.names.fresh_term_name("x$");
                self.at(range, TreeKind::Bind { name, body: self.alloc(pat) })
            }
        }
    }

    fn make_value(&self, pat: &Tree<'a>) -> Tree<'a> {
        match pat.kind {
            TreeKind::Bind { name, .. } => self.ident(pat.range, name),
            _ => self.wildcard_ident(pat.range),
        }
    }

    /// Desugar a for-comprehension to method calls: generators become
    /// `map`/`flatMap` (`foreach` without yield), guards become
    /// `withFilter`, and `pat = rhs` assignments are tupled into the
    /// preceding generator.
    pub fn mk_for(&self, mut enums: Vec<Enumerator<'a>>, body: ForBody<'a>) -> Tree<'a> {
        let is_yield = matches!(body, ForBody::Yield(_));
        let map_name = if is_yield {
            self.names.term_of(self.names.std.map)
        } else {
            self.names.term_of(self.names.std.foreach)
        };
        let flat_map_name = if is_yield {
            self.names.term_of(self.names.std.flat_map)
        } else {
            self.names.term_of(self.names.std.foreach)
        };
        let with_filter = self.names.term_of(self.names.std.with_filter);

        let head = match enums.is_empty() {
            true => {
                let t = match body {
                    ForBody::Yield(t) | ForBody::NoYield(t) => t,
                };
                return self.error_tree(t.range.pos);
            }
            false => enums.remove(0),
        };

        match head {
            Enumerator::ValFrom { pat, rhs } => {
                if enums.is_empty() {
                    let t = match body {
                        ForBody::Yield(t) | ForBody::NoYield(t) => t,
                    };
                    return self.mk_combination(map_name, rhs, pat, t);
                }
                match enums[0].clone() {
                    Enumerator::ValFrom { .. } => {
                        let rest = self.mk_for(enums, body);
                        self.mk_combination(flat_map_name, rhs, pat, rest)
                    }
                    Enumerator::Filter { test } => {
                        enums.remove(0);
                        let filtered = self.mk_combination(with_filter, rhs, pat.clone(), test);
                        enums.insert(0, Enumerator::ValFrom { pat, rhs: filtered });
                        self.mk_for(enums, body)
                    }
                    Enumerator::ValEq { .. } => {
                        // Collect the run of assignments following the generator.
                        let mut valeqs = Vec::new();
                        while matches!(enums.first(), Some(Enumerator::ValEq { .. })) {
                            if let Enumerator::ValEq { pat, rhs } = enums.remove(0) {
                                valeqs.push((pat, rhs));
                            }
                        }
                        let defpat1 = self.make_bind(pat);
                        let defpats: Vec<Tree<'a>> =
                            valeqs.iter().map(|(p, _)| self.make_bind(p.clone())).collect();
                        let mut pdefs = Vec::new();
                        for (dp, (_, rhs)) in defpats.iter().zip(valeqs.iter()) {
                            let rhs_ref = self.alloc(rhs.clone());
                            pdefs.extend(self.mk_pat_def(
                                dp.range.union(rhs.range),
                                Modifiers::empty(),
                                dp.clone(),
                                rhs_ref,
                            ));
                        }
                        let mut ids = vec![self.make_value(&defpat1)];
                        ids.extend(defpats.iter().map(|p| self.make_value(p)));
                        let tuple_range = defpat1.range;
                        let tuple = self.mk_tuple_term(tuple_range, ids);
                        let inner_body = self.mk_block(tuple_range, pdefs, tuple);
                        let rhs1 = self.mk_for(
                            vec![Enumerator::ValFrom { pat: defpat1.clone(), rhs }],
                            ForBody::Yield(inner_body),
                        );
                        let mut allpats = vec![defpat1];
                        allpats.extend(defpats);
                        let untupled = Enumerator::ValFrom {
                            pat: self.mk_tuple_term(tuple_range, allpats),
                            rhs: rhs1,
                        };
                        enums.insert(0, untupled);
                        self.mk_for(enums, body)
                    }
                }
            }
            // The parser rejects a leading filter or assignment; reaching
            // here means error recovery already fired.
            Enumerator::ValEq { rhs, .. } | Enumerator::Filter { test: rhs } => {
                self.error_tree(rhs.range.pos)
            }
        }
    }

    // ========================================================================
    // New, templates, packagings
    // ========================================================================

    /// `new tpt(args)...` — the constructor invocation shape.
    pub fn mk_new_apply(&self, range: TextRange, tpt: Tree<'a>, argss: Vec<Vec<Tree<'a>>>) -> Tree<'a> {
        let new_tree = self.at(range, TreeKind::New(self.alloc(tpt)));
        let ctor = self.select(range, new_tree, self.names.term_of(self.names.std.constructor));
        let argss = if argss.is_empty() { vec![Vec::new()] } else { argss };
        argss
            .into_iter()
            .fold(ctor, |fun, args| self.apply(range, fun, args))
    }

    /// `new` with a template: a single parent without a body collapses to
    /// a constructor call; anything else becomes an anonymous class plus
    /// an instantiation of it.
    pub fn mk_new(
        &self,
        range: TextRange,
        parents: Vec<Tree<'a>>,
        self_def: Tree<'a>,
        stats: Vec<Tree<'a>>,
    ) -> Tree<'a> {
        let parents = if parents.is_empty() {
            vec![self.ident(TextRange::empty(range.pos), self.names.type_of(self.names.std.any_ref))]
        } else {
            parents
        };
        if parents.len() == 1 && stats.is_empty() && self_def.is_empty() {
            // Parents carry their argument lists as Applys; peel them off.
            let (tpt, argss) = self.peel_apply(parents.into_iter().next().unwrap());
            return self.mk_new_apply(range, tpt, argss);
        }
        let anon = self.names.type_of(self.names.std.anon_class);
        let template = self.mk_template(range, parents, self_def, Modifiers::empty(), None, stats);
        let class_def = self.at(
            range,
            TreeKind::ClassDef {
                mods: Modifiers::with_flags(ModFlags::FINAL | ModFlags::SYNTHETIC),
                name: anon,
                tparams: &[],
                impl_: self.alloc(template),
            },
        );
        let instantiation = self.mk_new_apply(range, self.ident(TextRange::empty(range.pos), anon), vec![]);
        self.mk_block(range, vec![class_def], instantiation)
    }

    fn peel_apply(&self, parent: Tree<'a>) -> (Tree<'a>, Vec<Vec<Tree<'a>>>) {
        match parent.kind {
            TreeKind::Apply { fun, args } => {
                let (tpt, mut argss) = self.peel_apply(fun.clone());
                argss.push(args.to_vec());
                (tpt, argss)
            }
            _ => (parent, Vec::new()),
        }
    }

    /// Default parents: a case definition gains `Product` and
    /// `Serializable`; an empty parent list becomes `AnyRef`.
    pub fn mk_parents(&self, mods: Modifiers<'a>, mut parents: Vec<Tree<'a>>, pos: u32) -> Vec<Tree<'a>> {
        if mods.is_case() {
            parents.push(self.ident(TextRange::empty(pos), self.names.type_of(self.names.std.product)));
            parents.push(self.ident(
                TextRange::empty(pos),
                self.names.type_of(self.names.std.serializable),
            ));
            parents
        } else if parents.is_empty() {
            vec![self.ident(TextRange::empty(pos), self.names.type_of(self.names.std.any_ref))]
        } else {
            parents
        }
    }

    /// Assemble a template. When a primary-constructor parameter list is
    /// given, the constructor `DefDef` is prepended to the body, after any
    /// early definitions.
    pub fn mk_template(
        &self,
        range: TextRange,
        parents: Vec<Tree<'a>>,
        self_def: Tree<'a>,
        constr_mods: Modifiers<'a>,
        vparamss: Option<&'a [&'a [Tree<'a>]]>,
        body: Vec<Tree<'a>>,
    ) -> Tree<'a> {
        let mut full_body = Vec::new();
        let mut rest = Vec::new();
        for stat in body {
            let early = match &stat.kind {
                TreeKind::ValDef { mods, .. } | TreeKind::TypeDef { mods, .. } => {
                    mods.has(ModFlags::PRESUPER)
                }
                _ => false,
            };
            if early {
                full_body.push(stat);
            } else {
                rest.push(stat);
            }
        }
        if let Some(vparamss) = vparamss {
            full_body.push(self.mk_primary_constructor(range.pos, constr_mods, vparamss));
        }
        full_body.append(&mut rest);
        let parents = self.alloc_list(parents);
        let self_def = self.alloc(self_def);
        let body = self.alloc_list(full_body);
        self.at(range, TreeKind::Template { parents, self_def, body })
    }

    /// The primary constructor: `def <init>(...) = ()`.
    pub fn mk_primary_constructor(
        &self,
        pos: u32,
        mods: Modifiers<'a>,
        vparamss: &'a [&'a [Tree<'a>]],
    ) -> Tree<'a> {
        let range = TextRange::empty(pos);
        let tpt = self.alloc(Tree::empty(pos));
        let rhs = self.alloc(self.mk_block(range, vec![], self.literal_unit(pos)));
        self.at(
            range,
            TreeKind::DefDef {
                mods,
                name: self.names.term_of(self.names.std.constructor),
                tparams: &[],
                vparamss,
                tpt,
                rhs,
            },
        )
    }

    /// `package object name { ... }` is a packaging holding one module
    /// named `package`.
    pub fn mk_package_object(&self, range: TextRange, module: Tree<'a>) -> Tree<'a> {
        let (name, mods, impl_) = match module.kind {
            TreeKind::ModuleDef { mods, name, impl_ } => (name, mods, impl_),
            _ => return module,
        };
        let pid = self.alloc(self.ident(TextRange::empty(range.pos), name));
        let pkg_module = self.at(
            module.range,
            TreeKind::ModuleDef {
                mods,
                name: self.names.term_of(self.names.std.package_obj),
                impl_,
            },
        );
        let stats = self.alloc_list(vec![pkg_module]);
        self.at(range, TreeKind::PackageDef { pid, stats })
    }

    pub fn mk_packaging(&self, range: TextRange, pid: Tree<'a>, stats: Vec<Tree<'a>>) -> Tree<'a> {
        let pid = self.alloc(pid);
        let stats = self.alloc_list(stats);
        self.at(range, TreeKind::PackageDef { pid, stats })
    }

    /// The implicit empty package wrapping a unit with no package clause.
    pub fn mk_empty_package(&self, range: TextRange, stats: Vec<Tree<'a>>) -> Tree<'a> {
        let pid = self.ident(
            TextRange::empty(range.pos),
            self.names.term_of(self.names.std.empty_package),
        );
        self.mk_packaging(range, pid, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (&'static Bump, &'static Names) {
        let arena = Box::leak(Box::new(Bump::new()));
        let names = Box::leak(Box::new(Names::new()));
        (arena, names)
    }

    #[test]
    fn test_strip_parens() {
        let (arena, names) = setup();
        let b = TreeBuilder::new(arena, names);
        let range = TextRange::new(0, 4);
        let x = b.ident(TextRange::new(1, 2), names.term("x"));
        let parens = b.at(range, TreeKind::Parens(b.alloc_list(vec![x])));
        let stripped = b.strip_parens(parens);
        assert!(matches!(stripped.kind, TreeKind::Ident(_)));

        let unit = b.strip_parens(b.at(range, TreeKind::Parens(&[])));
        assert!(matches!(unit.kind, TreeKind::Literal(Constant::Unit)));
    }

    #[test]
    fn test_tuple_term() {
        let (arena, names) = setup();
        let b = TreeBuilder::new(arena, names);
        let range = TextRange::new(0, 6);
        let x = b.ident(TextRange::new(1, 2), names.term("x"));
        let y = b.ident(TextRange::new(4, 5), names.term("y"));
        let t = b.mk_tuple_term(range, vec![x, y]);
        match t.kind {
            TreeKind::Apply { fun, args } => {
                assert_eq!(fun.as_ident().map(|n| names.display(n)), Some("Tuple2".into()));
                assert_eq!(args.len(), 2);
            }
            _ => panic!("expected Apply"),
        }
    }

    #[test]
    fn test_pat_def_two_binders() {
        let (arena, names) = setup();
        let b = TreeBuilder::new(arena, names);
        let range = TextRange::new(0, 14);
        // val (x, y) = e
        let x = b.ident(TextRange::new(5, 6), names.term("x"));
        let y = b.ident(TextRange::new(8, 9), names.term("y"));
        let pat = b.mk_tuple_term(TextRange::new(4, 10), vec![x, y]);
        let rhs = b.alloc(b.ident(TextRange::new(13, 14), names.term("e")));
        let defs = b.mk_pat_def(range, Modifiers::empty(), pat, rhs);
        assert_eq!(defs.len(), 3);
        // First is the synthetic tuple val, then accessors for x and y.
        match &defs[0].kind {
            TreeKind::ValDef { mods, rhs, .. } => {
                assert!(mods.has(ModFlags::SYNTHETIC));
                assert!(matches!(rhs.kind, TreeKind::Match { .. }));
            }
            _ => panic!("expected ValDef"),
        }
        match &defs[1].kind {
            TreeKind::ValDef { name, rhs, .. } => {
                assert_eq!(names.display(*name), "x");
                match rhs.kind {
                    TreeKind::Select { name, .. } => assert_eq!(names.display(name), "_1"),
                    _ => panic!("expected Select"),
                }
            }
            _ => panic!("expected ValDef"),
        }
    }

    #[test]
    fn test_for_yield_with_filter() {
        let (arena, names) = setup();
        let b = TreeBuilder::new(arena, names);
        // for (x <- xs if p) yield body
        let x = b.ident(TextRange::new(5, 6), names.term("x"));
        let xs = b.ident(TextRange::new(10, 12), names.term("xs"));
        let p = b.ident(TextRange::new(16, 17), names.term("p"));
        let body = b.ident(TextRange::new(25, 29), names.term("body"));
        let enums = vec![b.mk_generator(x, false, xs), b.mk_filter(p)];
        let t = b.mk_for(enums, ForBody::Yield(body));
        // xs.withFilter(x => p).map(x => body)
        match t.kind {
            TreeKind::Apply { fun, .. } => match fun.kind {
                TreeKind::Select { qualifier, name } => {
                    assert_eq!(names.display(name), "map");
                    match qualifier.kind {
                        TreeKind::Apply { fun, .. } => match fun.kind {
                            TreeKind::Select { name, .. } => {
                                assert_eq!(names.display(name), "withFilter")
                            }
                            _ => panic!("expected Select"),
                        },
                        _ => panic!("expected Apply"),
                    }
                }
                _ => panic!("expected Select"),
            },
            _ => panic!("expected Apply"),
        }
    }

    #[test]
    fn test_make_while_shape() {
        let (arena, names) = setup();
        let b = TreeBuilder::new(arena, names);
        let cond = b.ident(TextRange::new(7, 8), names.term("c"));
        let body = b.ident(TextRange::new(10, 11), names.term("b"));
        let label = names.fresh_term_name("while$");
        let t = b.make_while(TextRange::new(0, 11), label, cond, body);
        match t.kind {
            TreeKind::LabelDef { name, body } => {
                assert_eq!(name, label);
                assert!(matches!(body.kind, TreeKind::If { .. }));
            }
            _ => panic!("expected LabelDef"),
        }
    }
}
