//! Parser integration tests.
//!
//! Verifies that the parser builds the expected tree shapes from Fjord
//! source, including the desugarings performed during the parse.

use bumpalo::Bump;
use fjord_ast::modifiers::ModFlags;
use fjord_ast::name::Names;
use fjord_ast::tree::{Constant, Tree, TreeKind};
use fjord_diagnostics::DiagnosticCollection;
use fjord_parser::{Parser, ParserOptions};

/// Parse a sequence of template statements and hand the results to `f`.
fn with_stats<R>(
    source: &str,
    options: ParserOptions,
    f: impl for<'a> FnOnce(&Names, &[Tree<'a>], &DiagnosticCollection) -> R,
) -> R {
    let arena = Bump::new();
    let names = Names::new();
    let mut parser = Parser::new(&arena, &names, "test.fj", source, options);
    let stats = parser.parse_stats();
    let diagnostics = parser.take_diagnostics();
    f(&names, &stats, &diagnostics)
}

fn with_default_stats<R>(
    source: &str,
    f: impl for<'a> FnOnce(&Names, &[Tree<'a>], &DiagnosticCollection) -> R,
) -> R {
    with_stats(source, ParserOptions::default(), f)
}

/// Parse a full compilation unit.
fn with_unit<R>(
    source: &str,
    f: impl for<'a> FnOnce(&Names, &Tree<'a>, &DiagnosticCollection) -> R,
) -> R {
    let arena = Bump::new();
    let names = Names::new();
    let mut parser = Parser::new(&arena, &names, "test.fj", source, ParserOptions::default());
    let unit = parser.parse();
    let diagnostics = parser.take_diagnostics();
    f(&names, &unit, &diagnostics)
}

fn name_of(names: &Names, t: &Tree<'_>) -> String {
    match t.kind {
        TreeKind::Ident(n) => names.display(n),
        TreeKind::Select { name, .. } => names.display(name),
        _ => panic!("expected Ident or Select, got {:?}", t.kind),
    }
}

fn assert_no_errors(diags: &DiagnosticCollection) {
    assert!(
        !diags.has_errors(),
        "unexpected errors: {:?}",
        diags.diagnostics()
    );
}

// ============================================================================
// Operator precedence and associativity
// ============================================================================

#[test]
fn test_precedence_mul_over_add() {
    // 1 + 2 * 3  ==>  1.+(2.*(3))
    with_default_stats("1 + 2 * 3", |names, stats, diags| {
        assert_no_errors(diags);
        assert_eq!(stats.len(), 1);
        match stats[0].kind {
            TreeKind::Apply { fun, args } => {
                match fun.kind {
                    TreeKind::Select { qualifier, name } => {
                        assert_eq!(names.display(name), "+");
                        assert!(matches!(qualifier.kind, TreeKind::Literal(Constant::Int(1))));
                    }
                    _ => panic!("expected Select"),
                }
                assert_eq!(args.len(), 1);
                match args[0].kind {
                    TreeKind::Apply { fun, args } => {
                        match fun.kind {
                            TreeKind::Select { qualifier, name } => {
                                assert_eq!(names.display(name), "*");
                                assert!(matches!(qualifier.kind, TreeKind::Literal(Constant::Int(2))));
                            }
                            _ => panic!("expected Select"),
                        }
                        assert!(matches!(args[0].kind, TreeKind::Literal(Constant::Int(3))));
                    }
                    _ => panic!("expected Apply"),
                }
            }
            _ => panic!("expected Apply, got {:?}", stats[0].kind),
        }
    });
}

#[test]
fn test_right_associative_cons() {
    // a :: b :: Nil groups to the right
    with_default_stats("a :: b :: Nil", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, args } => {
                match fun.kind {
                    TreeKind::Select { qualifier, name } => {
                        assert_eq!(names.display(name), "::");
                        assert_eq!(name_of(names, qualifier), "a");
                    }
                    _ => panic!("expected Select"),
                }
                match args[0].kind {
                    TreeKind::Apply { fun, args } => {
                        match fun.kind {
                            TreeKind::Select { qualifier, name } => {
                                assert_eq!(names.display(name), "::");
                                assert_eq!(name_of(names, qualifier), "b");
                            }
                            _ => panic!("expected Select"),
                        }
                        assert_eq!(name_of(names, &args[0]), "Nil");
                    }
                    _ => panic!("expected Apply"),
                }
            }
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_alphanumeric_operator_binds_tightest() {
    // per the precedence table, `max` binds tighter than `+`
    with_default_stats("a + b max c", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, .. } => match fun.kind {
                TreeKind::Select { name, .. } => assert_eq!(names.display(name), "+"),
                _ => panic!("expected Select"),
            },
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_mixed_associativity_is_an_error() {
    with_default_stats("1 +: 2 + 3", |_names, _stats, diags| {
        let count = diags
            .diagnostics()
            .iter()
            .filter(|d| d.message.contains("may not be mixed"))
            .count();
        assert_eq!(count, 1);
    });
}

#[test]
fn test_postfix_operator() {
    with_default_stats("val a = xs toList", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { rhs, .. } => match rhs.kind {
                TreeKind::Select { qualifier, name } => {
                    assert_eq!(names.display(name), "toList");
                    assert_eq!(name_of(names, qualifier), "xs");
                }
                _ => panic!("expected Select, got {:?}", rhs.kind),
            },
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_trailing_operator_continues_over_newline() {
    with_default_stats("val a = x +\n  y", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { rhs, .. } => match rhs.kind {
                TreeKind::Apply { fun, .. } => match fun.kind {
                    TreeKind::Select { name, .. } => assert_eq!(names.display(name), "+"),
                    _ => panic!("expected Select"),
                },
                _ => panic!("expected Apply"),
            },
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_unary_minus_folds_literal() {
    with_default_stats("val a = -1", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { rhs, .. } => {
                assert!(matches!(rhs.kind, TreeKind::Literal(Constant::Int(-1))));
            }
            _ => panic!("expected ValDef"),
        }
    });
}

// ============================================================================
// Placeholder syntax
// ============================================================================

#[test]
fn test_placeholder_becomes_function() {
    with_default_stats("_ + 1", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Function { params, body } => {
                assert_eq!(params.len(), 1);
                assert!(matches!(body.kind, TreeKind::Apply { .. }));
            }
            _ => panic!("expected Function, got {:?}", stats[0].kind),
        }
    });
}

#[test]
fn test_placeholder_closes_over_argument() {
    // List(1, 2).map(_ + 1): the placeholder binds at the argument
    with_default_stats("List(1, 2).map(_ + 1)", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, args } => {
                match fun.kind {
                    TreeKind::Select { name, .. } => assert_eq!(names.display(name), "map"),
                    _ => panic!("expected Select"),
                }
                match args[0].kind {
                    TreeKind::Function { params, body } => {
                        assert_eq!(params.len(), 1);
                        let pname = match params[0].kind {
                            TreeKind::ValDef { name, mods, .. } => {
                                assert!(mods.has(ModFlags::SYNTHETIC));
                                name
                            }
                            _ => panic!("expected ValDef"),
                        };
                        match body.kind {
                            TreeKind::Apply { fun, .. } => match fun.kind {
                                TreeKind::Select { qualifier, .. } => {
                                    assert_eq!(qualifier.as_ident(), Some(pname));
                                }
                                _ => panic!("expected Select"),
                            },
                            _ => panic!("expected Apply"),
                        }
                    }
                    _ => panic!("expected Function, got {:?}", args[0].kind),
                }
            }
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_two_placeholders_in_source_order() {
    with_default_stats("f(_ + _)", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { args, .. } => match args[0].kind {
                TreeKind::Function { params, .. } => assert_eq!(params.len(), 2),
                _ => panic!("expected Function"),
            },
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_typed_placeholder() {
    with_default_stats("(_: Int) + 1", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Function { params, .. } => {
                match params[0].kind {
                    TreeKind::ValDef { tpt, .. } => assert!(!tpt.is_empty()),
                    _ => panic!("expected ValDef"),
                }
            }
            _ => panic!("expected Function, got {:?}", stats[0].kind),
        }
    });
}

#[test]
fn test_eta_expansion_marker() {
    with_default_stats("val g = f _", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { rhs, .. } => match rhs.kind {
                TreeKind::Typed { tpt, .. } => {
                    assert!(matches!(tpt.kind, TreeKind::Function { params, .. } if params.is_empty()));
                }
                _ => panic!("expected Typed, got {:?}", rhs.kind),
            },
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_underscore_lambda() {
    with_default_stats("val f = (_: Int) => 1", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { rhs, .. } => {
                assert!(matches!(rhs.kind, TreeKind::Function { .. }));
            }
            _ => panic!("expected ValDef"),
        }
    });
}

// ============================================================================
// Pattern definitions
// ============================================================================

#[test]
fn test_simple_val() {
    with_default_stats("val x = 1", |names, stats, diags| {
        assert_no_errors(diags);
        assert_eq!(stats.len(), 1);
        match stats[0].kind {
            TreeKind::ValDef { name, rhs, .. } => {
                assert_eq!(names.display(name), "x");
                assert!(matches!(rhs.kind, TreeKind::Literal(Constant::Int(1))));
            }
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_tuple_pattern_val_desugars() {
    // val (x, y) = e: a synthetic matcher val plus two accessors
    with_default_stats("val (x, y) = e", |names, stats, diags| {
        assert_no_errors(diags);
        assert_eq!(stats.len(), 3);
        match stats[0].kind {
            TreeKind::ValDef { mods, rhs, .. } => {
                assert!(mods.has(ModFlags::SYNTHETIC));
                match rhs.kind {
                    TreeKind::Match { cases, .. } => assert_eq!(cases.len(), 1),
                    _ => panic!("expected Match"),
                }
            }
            _ => panic!("expected ValDef"),
        }
        match stats[1].kind {
            TreeKind::ValDef { name, rhs, .. } => {
                assert_eq!(names.display(name), "x");
                match rhs.kind {
                    TreeKind::Select { name, .. } => assert_eq!(names.display(name), "_1"),
                    _ => panic!("expected Select"),
                }
            }
            _ => panic!("expected ValDef"),
        }
        match stats[2].kind {
            TreeKind::ValDef { name, rhs, .. } => {
                assert_eq!(names.display(name), "y");
                match rhs.kind {
                    TreeKind::Select { name, .. } => assert_eq!(names.display(name), "_2"),
                    _ => panic!("expected Select"),
                }
            }
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_abstract_val_is_deferred() {
    with_default_stats("val x: Int", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { mods, rhs, .. } => {
                assert!(mods.has(ModFlags::DEFERRED));
                assert!(rhs.is_empty());
            }
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_var_default_init() {
    with_default_stats("var x: Int = _", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { mods, rhs, .. } => {
                assert!(mods.has(ModFlags::MUTABLE));
                assert!(mods.has(ModFlags::DEFAULTINIT));
                assert!(rhs.is_empty());
            }
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_lazy_abstract_is_error() {
    with_default_stats("lazy val x: Int", |_names, _stats, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("lazy values may not be abstract")));
    });
}

// ============================================================================
// For comprehensions
// ============================================================================

#[test]
fn test_for_yield_desugars_to_map() {
    with_default_stats("for (x <- xs) yield x + 1", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, args } => {
                match fun.kind {
                    TreeKind::Select { qualifier, name } => {
                        assert_eq!(names.display(name), "map");
                        assert_eq!(name_of(names, qualifier), "xs");
                    }
                    _ => panic!("expected Select"),
                }
                assert!(matches!(args[0].kind, TreeKind::Function { .. }));
            }
            _ => panic!("expected Apply, got {:?}", stats[0].kind),
        }
    });
}

#[test]
fn test_for_with_filter() {
    // for (x <- xs if x > 0) yield x + 1
    //   ==> xs.withFilter(x => x.>(0)).map(x => x.+(1))
    with_default_stats("for (x <- xs if x > 0) yield x + 1", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, .. } => match fun.kind {
                TreeKind::Select { qualifier, name } => {
                    assert_eq!(names.display(name), "map");
                    match qualifier.kind {
                        TreeKind::Apply { fun, .. } => match fun.kind {
                            TreeKind::Select { name, .. } => {
                                assert_eq!(names.display(name), "withFilter");
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
    });
}

#[test]
fn test_for_two_generators_uses_flat_map() {
    with_default_stats(
        "for (x <- xs; y <- ys) yield x + y",
        |names, stats, diags| {
            assert_no_errors(diags);
            match stats[0].kind {
                TreeKind::Apply { fun, .. } => match fun.kind {
                    TreeKind::Select { name, .. } => assert_eq!(names.display(name), "flatMap"),
                    _ => panic!("expected Select"),
                },
                _ => panic!("expected Apply"),
            }
        },
    );
}

#[test]
fn test_for_without_yield_uses_foreach() {
    with_default_stats("for (x <- xs) f(x)", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, .. } => match fun.kind {
                TreeKind::Select { name, .. } => assert_eq!(names.display(name), "foreach"),
                _ => panic!("expected Select"),
            },
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_for_assignment_enumerator() {
    with_default_stats(
        "for (x <- xs; y = x + 1) yield y",
        |_names, stats, diags| {
            assert_no_errors(diags);
            // The assignment tuples into the preceding generator; the
            // result is still an application chain.
            assert!(matches!(stats[0].kind, TreeKind::Apply { .. }));
        },
    );
}

#[test]
fn test_val_in_for_is_deprecated_with_future() {
    let options = ParserOptions { future: true, ..Default::default() };
    with_stats("for (x <- xs; val y = x) yield y", options, |_n, _s, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("val keyword in for comprehension")));
    });
}

// ============================================================================
// Definitions
// ============================================================================

#[test]
fn test_def_with_implicit_clause() {
    with_default_stats(
        "def f(x: Int)(implicit ev: E): Int = x",
        |names, stats, diags| {
            assert_no_errors(diags);
            match stats[0].kind {
                TreeKind::DefDef { name, vparamss, tpt, .. } => {
                    assert_eq!(names.display(name), "f");
                    assert_eq!(vparamss.len(), 2);
                    assert_eq!(vparamss[0].len(), 1);
                    assert_eq!(vparamss[1].len(), 1);
                    match vparamss[1][0].kind {
                        TreeKind::ValDef { mods, .. } => assert!(mods.is_implicit()),
                        _ => panic!("expected ValDef"),
                    }
                    assert_eq!(name_of(names, tpt), "Int");
                }
                _ => panic!("expected DefDef"),
            }
        },
    );
}

#[test]
fn test_context_bound_synthesizes_evidence() {
    // class C[T: Ord](x: T): the constructor gains an implicit clause
    // with one Ord[T] evidence parameter.
    with_default_stats("class C[T: Ord](x: T)", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ClassDef { impl_, .. } => match impl_.kind {
                TreeKind::Template { body, .. } => {
                    let ctor = body
                        .iter()
                        .find(|t| {
                            matches!(t.kind, TreeKind::DefDef { name, .. }
                                if names.display(name) == "<init>")
                        })
                        .expect("expected a primary constructor");
                    match ctor.kind {
                        TreeKind::DefDef { vparamss, .. } => {
                            assert_eq!(vparamss.len(), 2);
                            match vparamss[1][0].kind {
                                TreeKind::ValDef { mods, tpt, .. } => {
                                    assert!(mods.is_implicit());
                                    assert!(mods.has(ModFlags::SYNTHETIC));
                                    match tpt.kind {
                                        TreeKind::AppliedType { tpt, args } => {
                                            assert_eq!(name_of(names, tpt), "Ord");
                                            assert_eq!(args.len(), 1);
                                        }
                                        _ => panic!("expected AppliedType"),
                                    }
                                }
                                _ => panic!("expected ValDef"),
                            }
                        }
                        _ => unreachable!(),
                    }
                }
                _ => panic!("expected Template"),
            },
            _ => panic!("expected ClassDef"),
        }
    });
}

#[test]
fn test_case_class_gets_product_parents() {
    with_default_stats("case class P(x: Int)", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ClassDef { mods, impl_, .. } => {
                assert!(mods.is_case());
                match impl_.kind {
                    TreeKind::Template { parents, .. } => {
                        let rendered: Vec<String> =
                            parents.iter().map(|p| name_of(names, p)).collect();
                        assert!(rendered.contains(&"Product".to_string()));
                        assert!(rendered.contains(&"Serializable".to_string()));
                    }
                    _ => panic!("expected Template"),
                }
            }
            _ => panic!("expected ClassDef"),
        }
    });
}

#[test]
fn test_case_class_without_params_is_error() {
    with_default_stats("case class C", |_names, _stats, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("must have a parameter list")));
    });
}

#[test]
fn test_trait_context_bound_is_error() {
    with_default_stats("trait T[A: Ord]", |_names, _stats, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("context bounds")));
    });
}

#[test]
fn test_procedure_syntax_deprecated_with_future() {
    let options = ParserOptions { future: true, ..Default::default() };
    with_stats("def run { f() }", options, |names, stats, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("Procedure syntax")));
        match stats[0].kind {
            TreeKind::DefDef { tpt, .. } => assert_eq!(name_of(names, tpt), "Unit"),
            _ => panic!("expected DefDef"),
        }
    });
}

#[test]
fn test_macro_def() {
    with_default_stats("def impl = macro implBody", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::DefDef { mods, rhs, .. } => {
                assert!(mods.has(ModFlags::MACRO));
                assert!(matches!(rhs.kind, TreeKind::Ident(_)));
            }
            _ => panic!("expected DefDef"),
        }
    });
}

#[test]
fn test_type_alias_and_abstract_type() {
    with_default_stats("type T = Int\ntype U <: AnyRef", |_names, stats, diags| {
        assert_no_errors(diags);
        assert_eq!(stats.len(), 2);
        match stats[0].kind {
            TreeKind::TypeDef { mods, .. } => assert!(!mods.is_deferred()),
            _ => panic!("expected TypeDef"),
        }
        match stats[1].kind {
            TreeKind::TypeDef { mods, rhs, .. } => {
                assert!(mods.is_deferred());
                assert!(matches!(rhs.kind, TreeKind::TypeBounds { .. }));
            }
            _ => panic!("expected TypeDef"),
        }
    });
}

#[test]
fn test_auxiliary_constructor() {
    let src = "class C(x: Int) { def this() = this(0) }";
    with_default_stats(src, |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ClassDef { impl_, .. } => match impl_.kind {
                TreeKind::Template { body, .. } => {
                    let ctors = body
                        .iter()
                        .filter(|t| {
                            matches!(t.kind, TreeKind::DefDef { name, .. }
                                if names.display(name) == "<init>")
                        })
                        .count();
                    assert_eq!(ctors, 2);
                }
                _ => panic!("expected Template"),
            },
            _ => panic!("expected ClassDef"),
        }
    });
}

// ============================================================================
// Templates
// ============================================================================

#[test]
fn test_early_initializers() {
    // new { val x = 1 } with A with B { def y = 2 }
    with_default_stats(
        "new { val x = 1 } with A with B { def y = 2 }",
        |names, stats, diags| {
            assert_no_errors(diags);
            match stats[0].kind {
                TreeKind::Block { stats: inner, .. } => match inner[0].kind {
                    TreeKind::ClassDef { impl_, .. } => match impl_.kind {
                        TreeKind::Template { parents, body, .. } => {
                            let rendered: Vec<String> =
                                parents.iter().map(|p| name_of(names, p)).collect();
                            assert_eq!(rendered, vec!["A".to_string(), "B".to_string()]);
                            match body[0].kind {
                                TreeKind::ValDef { mods, name, .. } => {
                                    assert!(mods.has(ModFlags::PRESUPER));
                                    assert_eq!(names.display(name), "x");
                                }
                                _ => panic!("expected early ValDef first, got {:?}", body[0].kind),
                            }
                            assert!(body.iter().any(|t| {
                                matches!(t.kind, TreeKind::DefDef { name, .. }
                                    if names.display(name) == "y")
                            }));
                        }
                        _ => panic!("expected Template"),
                    },
                    _ => panic!("expected ClassDef"),
                },
                _ => panic!("expected Block, got {:?}", stats[0].kind),
            }
        },
    );
}

#[test]
fn test_new_single_parent_is_constructor_call() {
    with_default_stats("new A(1)", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, args } => {
                assert_eq!(args.len(), 1);
                match fun.kind {
                    TreeKind::Select { qualifier, name } => {
                        assert_eq!(names.display(name), "<init>");
                        assert!(matches!(qualifier.kind, TreeKind::New(_)));
                    }
                    _ => panic!("expected Select"),
                }
            }
            _ => panic!("expected Apply, got {:?}", stats[0].kind),
        }
    });
}

#[test]
fn test_self_type_declaration() {
    with_default_stats("class C { self: T => def m = 1 }", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ClassDef { impl_, .. } => match impl_.kind {
                TreeKind::Template { self_def, body, .. } => {
                    match self_def.kind {
                        TreeKind::ValDef { name, tpt, .. } => {
                            assert_eq!(names.display(name), "self");
                            assert!(!tpt.is_empty());
                        }
                        _ => panic!("expected self ValDef, got {:?}", self_def.kind),
                    }
                    assert!(body.iter().any(|t| {
                        matches!(t.kind, TreeKind::DefDef { name, .. }
                            if names.display(name) == "m")
                    }));
                }
                _ => panic!("expected Template"),
            },
            _ => panic!("expected ClassDef"),
        }
    });
}

#[test]
fn test_object_def() {
    with_default_stats("object O { val x = 1 }", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ModuleDef { name, .. } => assert_eq!(names.display(name), "O"),
            _ => panic!("expected ModuleDef"),
        }
    });
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn test_if_without_else_gets_unit() {
    with_default_stats("if (c) f()", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::If { else_part, .. } => {
                assert!(matches!(else_part.kind, TreeKind::Literal(Constant::Unit)));
            }
            _ => panic!("expected If"),
        }
    });
}

#[test]
fn test_while_desugars_to_label() {
    with_default_stats("while (c) f()", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::LabelDef { body, .. } => {
                assert!(matches!(body.kind, TreeKind::If { .. }));
            }
            _ => panic!("expected LabelDef"),
        }
    });
}

#[test]
fn test_do_while_desugars_to_label() {
    with_default_stats("do f() while (c)", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::LabelDef { body, .. } => {
                assert!(matches!(body.kind, TreeKind::Block { .. }));
            }
            _ => panic!("expected LabelDef"),
        }
    });
}

#[test]
fn test_try_catch_finally() {
    let src = "try f() catch { case e: Err => g() } finally h()";
    with_default_stats(src, |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Try { catches, finalizer, .. } => {
                assert_eq!(catches.len(), 1);
                assert!(!finalizer.is_empty());
            }
            _ => panic!("expected Try"),
        }
    });
}

#[test]
fn test_catch_expression_is_wrapped() {
    with_default_stats("try f() catch handler", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Try { catches, .. } => {
                assert_eq!(catches.len(), 1);
                match catches[0].kind {
                    TreeKind::CaseDef { pat, .. } => {
                        assert!(matches!(pat.kind, TreeKind::Bind { .. }));
                    }
                    _ => panic!("expected CaseDef"),
                }
            }
            _ => panic!("expected Try"),
        }
    });
}

#[test]
fn test_assignment_shapes() {
    with_default_stats("x = 1", |_names, stats, diags| {
        assert_no_errors(diags);
        assert!(matches!(stats[0].kind, TreeKind::Assign { .. }));
    });
}

#[test]
fn test_named_argument() {
    with_default_stats("f(x = 1)", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { args, .. } => {
                assert!(matches!(args[0].kind, TreeKind::NamedArg { .. }));
            }
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_tuple_expression() {
    with_default_stats("val p = (1, 2)", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { rhs, .. } => match rhs.kind {
                TreeKind::Apply { fun, args } => {
                    assert_eq!(name_of(names, fun), "Tuple2");
                    assert_eq!(args.len(), 2);
                }
                _ => panic!("expected Apply"),
            },
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_block_argument() {
    with_default_stats("xs.map { x => x }", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { args, .. } => {
                assert_eq!(args.len(), 1);
            }
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_string_interpolation_desugars() {
    with_default_stats(r#"s"a $x""#, |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { fun, args } => {
                assert_eq!(args.len(), 1);
                match fun.kind {
                    TreeKind::Select { qualifier, name } => {
                        assert_eq!(names.display(name), "s");
                        match qualifier.kind {
                            TreeKind::Apply { fun, args } => {
                                assert_eq!(name_of(names, fun), "StringContext");
                                assert_eq!(args.len(), 2);
                            }
                            _ => panic!("expected Apply"),
                        }
                    }
                    _ => panic!("expected Select"),
                }
            }
            _ => panic!("expected Apply, got {:?}", stats[0].kind),
        }
    });
}

#[test]
fn test_match_expression() {
    with_default_stats(
        "e match { case 1 => a\ncase _ => b }",
        |_names, stats, diags| {
            assert_no_errors(diags);
            match stats[0].kind {
                TreeKind::Match { cases, .. } => assert_eq!(cases.len(), 2),
                _ => panic!("expected Match"),
            }
        },
    );
}

#[test]
fn test_partial_function_literal() {
    with_default_stats("xs.collect { case 1 => 2 }", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Apply { args, .. } => match args[0].kind {
                TreeKind::Match { selector, cases } => {
                    assert!(selector.is_empty());
                    assert_eq!(cases.len(), 1);
                }
                _ => panic!("expected Match"),
            },
            _ => panic!("expected Apply"),
        }
    });
}

#[test]
fn test_implicit_closure_in_block() {
    with_default_stats("{ implicit x => x }", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Function { params, .. } => match params[0].kind {
                TreeKind::ValDef { mods, .. } => assert!(mods.is_implicit()),
                _ => panic!("expected ValDef"),
            },
            _ => panic!("expected Function, got {:?}", stats[0].kind),
        }
    });
}

// ============================================================================
// Patterns
// ============================================================================

#[test]
fn test_uppercase_typed_pattern_is_error() {
    with_default_stats("e match { case X: Int => 1 }", |_names, _stats, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("lower-case letter")));
    });
}

#[test]
fn test_bind_pattern() {
    with_default_stats("e match { case x @ Some(_) => x }", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Match { cases, .. } => match cases[0].kind {
                TreeKind::CaseDef { pat, .. } => match pat.kind {
                    TreeKind::Bind { name, body } => {
                        assert_eq!(names.display(name), "x");
                        assert!(matches!(body.kind, TreeKind::Apply { .. }));
                    }
                    _ => panic!("expected Bind"),
                },
                _ => panic!("expected CaseDef"),
            },
            _ => panic!("expected Match"),
        }
    });
}

#[test]
fn test_sequence_wildcard_pattern() {
    with_default_stats(
        "e match { case Seq(xs @ _*) => xs }",
        |_names, stats, diags| {
            assert_no_errors(diags);
            match stats[0].kind {
                TreeKind::Match { cases, .. } => match cases[0].kind {
                    TreeKind::CaseDef { pat, .. } => match pat.kind {
                        TreeKind::Apply { args, .. } => match args[0].kind {
                            TreeKind::Bind { body, .. } => {
                                assert!(matches!(body.kind, TreeKind::Star(_)));
                            }
                            _ => panic!("expected Bind, got {:?}", args[0].kind),
                        },
                        _ => panic!("expected Apply"),
                    },
                    _ => panic!("expected CaseDef"),
                },
                _ => panic!("expected Match"),
            }
        },
    );
}

#[test]
fn test_alternative_pattern() {
    with_default_stats("e match { case 1 | 2 => a }", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Match { cases, .. } => match cases[0].kind {
                TreeKind::CaseDef { pat, .. } => match pat.kind {
                    TreeKind::Alternative(ts) => assert_eq!(ts.len(), 2),
                    _ => panic!("expected Alternative"),
                },
                _ => panic!("expected CaseDef"),
            },
            _ => panic!("expected Match"),
        }
    });
}

#[test]
fn test_infix_pattern_uses_pattern_shape() {
    with_default_stats("e match { case a :: b => a }", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Match { cases, .. } => match cases[0].kind {
                TreeKind::CaseDef { pat, .. } => match pat.kind {
                    TreeKind::Apply { fun, args } => {
                        assert_eq!(name_of(names, fun), "::");
                        assert_eq!(args.len(), 2);
                    }
                    _ => panic!("expected Apply, got {:?}", pat.kind),
                },
                _ => panic!("expected CaseDef"),
            },
            _ => panic!("expected Match"),
        }
    });
}

#[test]
fn test_guard() {
    with_default_stats("e match { case x if x > 0 => x }", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Match { cases, .. } => match cases[0].kind {
                TreeKind::CaseDef { guard, .. } => assert!(!guard.is_empty()),
                _ => panic!("expected CaseDef"),
            },
            _ => panic!("expected Match"),
        }
    });
}

// ============================================================================
// Types
// ============================================================================

#[test]
fn test_function_type_parameter() {
    with_default_stats("def g(f: (Int, String) => Int) = f", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::DefDef { vparamss, .. } => match vparamss[0][0].kind {
                TreeKind::ValDef { tpt, .. } => match tpt.kind {
                    TreeKind::AppliedType { tpt, args } => {
                        assert_eq!(name_of(names, tpt), "Function2");
                        assert_eq!(args.len(), 3);
                    }
                    _ => panic!("expected AppliedType, got {:?}", tpt.kind),
                },
                _ => panic!("expected ValDef"),
            },
            _ => panic!("expected DefDef"),
        }
    });
}

#[test]
fn test_compound_type_with_refinement() {
    with_default_stats("val x: A with B { def m: Int } = y", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { tpt, .. } => match tpt.kind {
                TreeKind::CompoundType { parents, refinement } => {
                    assert_eq!(parents.len(), 2);
                    assert_eq!(refinement.len(), 1);
                }
                _ => panic!("expected CompoundType, got {:?}", tpt.kind),
            },
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_existential_wildcard_type() {
    with_default_stats("val x: List[_] = y", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { tpt, .. } => match tpt.kind {
                TreeKind::ExistentialType { tpt, wheres } => {
                    assert!(matches!(tpt.kind, TreeKind::AppliedType { .. }));
                    assert_eq!(wheres.len(), 1);
                }
                _ => panic!("expected ExistentialType, got {:?}", tpt.kind),
            },
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_singleton_type() {
    with_default_stats("val x: a.type = a", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { tpt, .. } => {
                assert!(matches!(tpt.kind, TreeKind::SingletonType(_)));
            }
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_type_projection() {
    with_default_stats("val x: A#B = y", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::ValDef { tpt, .. } => {
                assert!(matches!(tpt.kind, TreeKind::SelectFromType { .. }));
            }
            _ => panic!("expected ValDef"),
        }
    });
}

#[test]
fn test_by_name_parameter() {
    with_default_stats("def f(x: => Int) = x", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::DefDef { vparamss, .. } => match vparamss[0][0].kind {
                TreeKind::ValDef { mods, .. } => assert!(mods.has(ModFlags::BYNAMEPARAM)),
                _ => panic!("expected ValDef"),
            },
            _ => panic!("expected DefDef"),
        }
    });
}

#[test]
fn test_repeated_parameter() {
    with_default_stats("def f(xs: Int*) = xs", |_names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::DefDef { vparamss, .. } => match vparamss[0][0].kind {
                TreeKind::ValDef { tpt, .. } => {
                    assert!(matches!(tpt.kind, TreeKind::AppliedType { .. }));
                }
                _ => panic!("expected ValDef"),
            },
            _ => panic!("expected DefDef"),
        }
    });
}

// ============================================================================
// Imports
// ============================================================================

#[test]
fn test_import_selectors() {
    with_default_stats("import a.b.{x => y, z, _}", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Import { selectors, .. } => {
                assert_eq!(selectors.len(), 3);
                assert_eq!(names.display(selectors[0].name), "x");
                assert_eq!(selectors[0].rename.map(|n| names.display(n)), Some("y".into()));
                assert!(names.is_wildcard(selectors[2].name));
                assert!(selectors[2].rename.is_none());
            }
            _ => panic!("expected Import"),
        }
    });
}

#[test]
fn test_wildcard_import_not_last_is_error() {
    with_default_stats("import a.{_, x}", |_names, _stats, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("last position")));
    });
}

#[test]
fn test_import_hide_selector() {
    with_default_stats("import a.{x => _, _}", |names, stats, diags| {
        assert_no_errors(diags);
        match stats[0].kind {
            TreeKind::Import { selectors, .. } => {
                assert_eq!(selectors.len(), 2);
                assert_eq!(names.display(selectors[0].name), "x");
                assert!(names.is_wildcard(selectors[0].rename.unwrap()));
            }
            _ => panic!("expected Import"),
        }
    });
}

// ============================================================================
// Compilation units and packages
// ============================================================================

#[test]
fn test_compilation_unit_is_package_def() {
    with_unit("package a.b\nclass C", |_names, unit, diags| {
        assert_no_errors(diags);
        assert!(matches!(unit.kind, TreeKind::PackageDef { .. }));
    });
}

#[test]
fn test_unit_without_package_gets_empty_package() {
    with_unit("class C", |names, unit, diags| {
        assert_no_errors(diags);
        match unit.kind {
            TreeKind::PackageDef { pid, .. } => {
                assert_eq!(name_of(names, pid), "<empty>");
            }
            _ => panic!("expected PackageDef"),
        }
    });
}

#[test]
fn test_package_object() {
    with_unit("package object a { val x = 1 }", |names, unit, diags| {
        assert_no_errors(diags);
        match unit.kind {
            TreeKind::PackageDef { stats, .. } => match stats[0].kind {
                TreeKind::ModuleDef { name, .. } => {
                    assert_eq!(names.display(name), "package");
                }
                _ => panic!("expected ModuleDef, got {:?}", stats[0].kind),
            },
            _ => panic!("expected PackageDef"),
        }
    });
}

#[test]
fn test_primitive_value_class_gets_synthetic_constructor() {
    with_unit("package fjord\nclass Int", |names, unit, diags| {
        assert_no_errors(diags);
        match unit.kind {
            TreeKind::PackageDef { stats, .. } => match stats[0].kind {
                TreeKind::PackageDef { stats, .. } => match stats[0].kind {
                    TreeKind::ClassDef { impl_, .. } => match impl_.kind {
                        TreeKind::Template { body, .. } => {
                            assert!(matches!(body[0].kind, TreeKind::DefDef { name, .. }
                                if names.display(name) == "<init>"));
                        }
                        _ => panic!("expected Template"),
                    },
                    _ => panic!("expected ClassDef"),
                },
                TreeKind::ClassDef { impl_, .. } => match impl_.kind {
                    TreeKind::Template { body, .. } => {
                        assert!(matches!(body[0].kind, TreeKind::DefDef { name, .. }
                            if names.display(name) == "<init>"));
                    }
                    _ => panic!("expected Template"),
                },
                _ => panic!("unexpected unit shape: {:?}", stats[0].kind),
            },
            _ => panic!("expected PackageDef"),
        }
    });
}

// ============================================================================
// Error recovery
// ============================================================================

#[test]
fn test_incomplete_input_at_eof() {
    with_default_stats("def f(", |_names, _stats, diags| {
        assert!(diags.diagnostics().iter().any(|d| d.is_incomplete_input()));
    });
}

#[test]
fn test_error_offsets_non_decreasing() {
    with_default_stats("def = 1\nval = 2\nclass = 3", |_n, _s, diags| {
        let offsets: Vec<u32> = diags
            .diagnostics()
            .iter()
            .filter(|d| d.is_error())
            .filter_map(|d| d.offset)
            .collect();
        for pair in offsets.windows(2) {
            assert!(pair[0] <= pair[1], "offsets went backwards: {:?}", offsets);
        }
    });
}

#[test]
fn test_recovery_continues_after_error() {
    with_default_stats("val = 1\nval y = 2", |names, stats, diags| {
        assert!(diags.has_errors());
        // The second definition survives recovery.
        assert!(stats.iter().any(|t| {
            matches!(t.kind, TreeKind::ValDef { name, .. }
                if names.display(name) == "y")
        }));
    });
}

#[test]
fn test_unbound_placeholder_rejected_at_top_level() {
    // A `_` escaping every boundary is a syntax error, not a crash.
    with_default_stats("val f = _", |_names, _stats, diags| {
        assert!(diags
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("unbound placeholder")));
    });
}
