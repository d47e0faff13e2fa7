//! fjord_diagnostics: Diagnostic messages and error reporting for the
//! Fjord front end.
//!
//! The scanner and parser report against a fixed catalogue of message
//! templates, each with a stable code. A realized `Diagnostic` carries
//! the rendered text, the source offset it points at, and whether the
//! report means the input simply ended too early (spec-level
//! "incomplete input", which interactive drivers treat as a prompt to
//! read more rather than a failure).

use fjord_core::text::TextPos;
use std::fmt;

/// How serious a diagnostic is. The parser emits errors and (for
/// deprecated syntax) warnings; nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        })
    }
}

/// An entry in the message catalogue: a stable code, a severity, and a
/// template with `{0}`-style holes.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticMessage {
    pub code: u32,
    pub severity: Severity,
    pub template: &'static str,
}

impl DiagnosticMessage {
    /// Render the template, substituting `args[n]` for each `{n}` hole.
    /// Unknown holes render as empty; a stray `{` is kept literally.
    pub fn render(&self, args: &[&str]) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            rest = &rest[open + 1..];
            let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            if digits > 0 && rest[digits..].starts_with('}') {
                let index: usize = rest[..digits].parse().unwrap_or(usize::MAX);
                out.push_str(args.get(index).copied().unwrap_or(""));
                rest = &rest[digits + 1..];
            } else {
                out.push('{');
            }
        }
        out.push_str(rest);
        out
    }
}

/// One realized report.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// The file the report points into, when known.
    pub file: Option<String>,
    /// The source offset the report points at, when known.
    pub offset: Option<TextPos>,
    /// The catalogue code.
    pub code: u32,
    pub severity: Severity,
    /// The rendered message text.
    pub message: String,
    /// Set when this is a syntax error at end of input.
    pub incomplete_input: bool,
}

impl Diagnostic {
    /// Render a catalogue message into a report with no location yet.
    pub fn report(message: &DiagnosticMessage, args: &[&str]) -> Self {
        Self {
            file: None,
            offset: None,
            code: message.code,
            severity: message.severity,
            message: message.render(args),
            incomplete_input: false,
        }
    }

    pub fn in_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    pub fn at_offset(mut self, offset: TextPos) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Mark this report as truncated-input rather than broken input.
    pub fn as_incomplete(mut self) -> Self {
        self.incomplete_input = true;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_incomplete_input(&self) -> bool {
        self.incomplete_input
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}", file)?;
            if let Some(offset) = self.offset {
                write!(f, "({})", offset)?;
            }
            write!(f, ": ")?;
        }
        write!(f, "{} FJ{}: {}", self.severity, self.code, self.message)
    }
}

/// The reports accumulated while processing one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticCollection {
    reports: Vec<Diagnostic>,
}

impl DiagnosticCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.reports.push(diagnostic);
    }

    pub fn extend(&mut self, other: DiagnosticCollection) {
        self.reports.extend(other.reports);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.reports
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.reports
    }

    pub fn has_errors(&self) -> bool {
        self.reports.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.reports.iter().filter(|d| d.is_error()).count()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Order reports by file, then by offset.
    pub fn sort(&mut self) {
        self.reports
            .sort_by(|a, b| match a.file.cmp(&b.file) {
                std::cmp::Ordering::Equal => a.offset.unwrap_or(0).cmp(&b.offset.unwrap_or(0)),
                order => order,
            });
    }
}

// ============================================================================
// The message catalogue
//
// Code ranges: 1000-1099 scanner, 1100-1199 parser syntax, 1200-1299
// parse-time semantic checks, 1300-1399 deprecations, 1900-1999 incomplete
// input.
// ============================================================================

pub mod messages {
    use super::*;

    macro_rules! diag {
        ($code:expr, Error, $msg:expr) => {
            DiagnosticMessage { code: $code, severity: Severity::Error, template: $msg }
        };
        ($code:expr, Warning, $msg:expr) => {
            DiagnosticMessage { code: $code, severity: Severity::Warning, template: $msg }
        };
    }

    // ========================================================================
    // Scanner errors (1000-1099)
    // ========================================================================
    pub const INVALID_CHARACTER: DiagnosticMessage = diag!(1000, Error, "invalid character");
    pub const UNTERMINATED_STRING_LITERAL: DiagnosticMessage = diag!(1001, Error, "unclosed string literal");
    pub const UNTERMINATED_CHARACTER_LITERAL: DiagnosticMessage = diag!(1002, Error, "unclosed character literal");
    pub const UNTERMINATED_COMMENT: DiagnosticMessage = diag!(1003, Error, "unclosed comment");
    pub const EMPTY_CHARACTER_LITERAL: DiagnosticMessage = diag!(1004, Error, "empty character literal");
    pub const INVALID_ESCAPE_CHARACTER: DiagnosticMessage = diag!(1005, Error, "invalid escape character");
    pub const MALFORMED_FLOATING_POINT: DiagnosticMessage = diag!(1006, Error, "malformed floating point number");
    pub const INTEGER_NUMBER_TOO_LARGE: DiagnosticMessage = diag!(1007, Error, "integer number too large");
    pub const EMPTY_QUOTED_IDENTIFIER: DiagnosticMessage = diag!(1008, Error, "empty quoted identifier");
    pub const UNCLOSED_QUOTED_IDENTIFIER: DiagnosticMessage = diag!(1009, Error, "unclosed quoted identifier");
    pub const ERROR_IN_INTERPOLATED_STRING: DiagnosticMessage = diag!(1010, Error, "error in interpolated string: identifier or block expected");

    // ========================================================================
    // Parser syntax errors (1100-1199)
    // ========================================================================
    pub const EXPECTED_BUT_FOUND: DiagnosticMessage = diag!(1100, Error, "'{0}' expected but '{1}' found.");
    pub const IDENTIFIER_EXPECTED: DiagnosticMessage = diag!(1101, Error, "identifier expected");
    pub const ILLEGAL_START_OF_SIMPLE_EXPRESSION: DiagnosticMessage = diag!(1102, Error, "illegal start of simple expression");
    pub const ILLEGAL_START_OF_SIMPLE_PATTERN: DiagnosticMessage = diag!(1103, Error, "illegal start of simple pattern");
    pub const ILLEGAL_START_OF_STATEMENT: DiagnosticMessage = diag!(1104, Error, "illegal start of statement");
    pub const ILLEGAL_START_OF_DEFINITION: DiagnosticMessage = diag!(1105, Error, "illegal start of definition");
    pub const ILLEGAL_START_OF_DECLARATION: DiagnosticMessage = diag!(1106, Error, "illegal start of declaration");
    pub const EXPRESSION_EXPECTED: DiagnosticMessage = diag!(1107, Error, "expression expected");
    pub const START_OF_DEFINITION_EXPECTED: DiagnosticMessage = diag!(1108, Error, "start of definition expected");
    pub const WILDCARD_NOT_ALLOWED_HERE: DiagnosticMessage = diag!(1109, Error, "unbound wildcard type");
    pub const UNBOUND_PLACEHOLDER_PARAMETER: DiagnosticMessage = diag!(1110, Error, "unbound placeholder parameter");
    pub const MIXED_ASSOCIATIVITY: DiagnosticMessage = diag!(1111, Error, "left- and right-associative operators with same precedence may not be mixed");
    pub const TYPE_ARGS_ON_POSTFIX: DiagnosticMessage = diag!(1112, Error, "type application is not allowed for postfix operators");
    pub const TYPE_ARGS_IN_PATTERN_OPERATOR: DiagnosticMessage = diag!(1113, Error, "infix patterns cannot have type arguments");
    pub const SELF_INVOCATION_EXPECTED: DiagnosticMessage = diag!(1114, Error, "auxiliary constructor body must begin with a call to another constructor");
    pub const ANONYMOUS_FUNCTION_PARAMETER_TYPE: DiagnosticMessage = diag!(1115, Error, "self-type annotation or anonymous function parameter list expected");
    pub const WILDCARD_MUST_BE_LAST_IMPORT: DiagnosticMessage = diag!(1116, Error, "wildcard import must be in last position");
    pub const IMPORT_SELECTOR_EXPECTED: DiagnosticMessage = diag!(1117, Error, "identifier or wildcard expected in import selector");
    pub const SEQUENCE_PATTERN_NOT_LAST: DiagnosticMessage = diag!(1118, Error, "bad simple pattern: bad use of _* (a sequence pattern must be the last pattern)");
    pub const SEQUENCE_PATTERN_OUTSIDE_ARGS: DiagnosticMessage = diag!(1119, Error, "bad simple pattern: bad use of _* (sequence pattern not allowed)");
    pub const BY_NAME_TYPE_POSITION: DiagnosticMessage = diag!(1120, Error, "by-name type parameter is only allowed in method parameter position");
    pub const REPEATED_TYPE_POSITION: DiagnosticMessage = diag!(1121, Error, "repeated type parameter is only allowed in method parameter position");
    pub const XML_NOT_SUPPORTED: DiagnosticMessage = diag!(1122, Error, "XML literals are not supported");
    pub const MISSING_PARAMETER_TYPE: DiagnosticMessage = diag!(1123, Error, "missing parameter type");
    pub const STATEMENT_SEPARATOR_EXPECTED: DiagnosticMessage = diag!(1124, Error, "';' expected but '{0}' found.");
    pub const EQUALS_OR_BODY_EXPECTED: DiagnosticMessage = diag!(1125, Error, "'=' expected but '{0}' found.");
    pub const CASE_EXPECTED: DiagnosticMessage = diag!(1126, Error, "'case' expected");
    pub const NOT_A_LEGAL_FORMAL_PARAMETER: DiagnosticMessage = diag!(1127, Error, "not a legal formal parameter");
    pub const VAL_IN_FOR_WITHOUT_ASSIGNMENT: DiagnosticMessage = diag!(1128, Error, "val in for comprehension must be followed by assignment");
    pub const USE_WILDCARD_STAR_FOR_SEQUENCE: DiagnosticMessage = diag!(1129, Error, "bad simple pattern: use _* to match a sequence");
    pub const TRAILING_STAR_PATTERN: DiagnosticMessage = diag!(1130, Error, "bad simple pattern: trailing * is not a valid pattern");
    pub const BAD_BRACE_OR_PAREN_AFTER_STAR: DiagnosticMessage = diag!(1131, Error, "bad simple pattern: bad brace or paren after _*");
    pub const ILLEGAL_START_OF_DECLARATION_HINT: DiagnosticMessage = diag!(1132, Error, "illegal start of declaration (possible cause: missing `=' in front of current method body)");
    pub const REPEATED_MODIFIER: DiagnosticMessage = diag!(1133, Error, "repeated modifier");
    pub const DUPLICATE_ACCESS_QUALIFIER: DiagnosticMessage = diag!(1134, Error, "duplicate private/protected qualifier");
    pub const NO_TYPE_PARAMS_HERE: DiagnosticMessage = diag!(1135, Error, "no type parameters allowed here");
    pub const EQ_TYPE_BOUNDS_EXPECTED: DiagnosticMessage = diag!(1136, Error, "`=', `>:', or `<:' expected");
    pub const EXPECTED_CLASS_OR_OBJECT: DiagnosticMessage = diag!(1137, Error, "expected class or object definition");

    // ========================================================================
    // Parse-time semantic checks (1200-1299)
    // ========================================================================
    pub const PATTERN_VARIABLE_LOWERCASE: DiagnosticMessage = diag!(1200, Error, "Pattern variables must start with a lower-case letter.");
    pub const LAZY_VALUES_ONLY: DiagnosticMessage = diag!(1201, Error, "lazy not allowed here. Only vals can be lazy");
    pub const LAZY_MAY_NOT_BE_ABSTRACT: DiagnosticMessage = diag!(1202, Error, "lazy values may not be abstract");
    pub const PATTERN_DEFINITION_MAY_NOT_BE_LAZY: DiagnosticMessage = diag!(1203, Error, "lazy values may not be defined by pattern definitions");
    pub const TRAIT_CONTEXT_BOUNDS: DiagnosticMessage = diag!(1204, Error, "traits cannot have type parameters with context bounds `: ...' nor view bounds `<% ...'");
    pub const TRAIT_PARAMETERS: DiagnosticMessage = diag!(1205, Error, "traits cannot have parameters");
    pub const CASE_CLASS_NEEDS_PARAMS: DiagnosticMessage = diag!(1206, Error, "case classes must have a parameter list; try 'case class {0}()'");
    pub const CASE_CLASS_IMPLICIT_FIRST: DiagnosticMessage = diag!(1207, Error, "case classes must have a non-implicit parameter list; try 'case class {0}()...'");
    pub const AUXILIARY_CONSTRUCTOR_IMPLICIT_FIRST: DiagnosticMessage = diag!(1208, Error, "auxiliary constructor needs non-implicit parameter list");
    pub const ONLY_CONCRETE_EARLY_DEFS: DiagnosticMessage = diag!(1209, Error, "only concrete field definitions allowed in early object initialization section");
    pub const MUTABLE_DEFAULT_NEEDS_VAR: DiagnosticMessage = diag!(1210, Error, "default initialization '= _' is only allowed for 'var' definitions");
    pub const VAL_VAR_ON_PARAMETER: DiagnosticMessage = diag!(1211, Error, "'val' and 'var' parameters are only allowed in class constructors");
    pub const MISSING_CONDITION_PARENS: DiagnosticMessage = diag!(1212, Error, "parenthesized condition expected");
    pub const CLASSES_CANNOT_BE_LAZY: DiagnosticMessage = diag!(1213, Error, "classes cannot be lazy");
    pub const VAL_PARAM_NOT_BY_NAME: DiagnosticMessage = diag!(1214, Error, "`val' parameters may not be call-by-name");
    pub const IMPLICIT_PARAM_NOT_BY_NAME: DiagnosticMessage = diag!(1215, Error, "implicit parameters may not be call-by-name");
    pub const LAZY_MODIFIER_ON_PARAM: DiagnosticMessage = diag!(1216, Error, "lazy modifier not allowed here. Use call-by-name parameters instead");
    pub const PATTERN_DEFINITION_NOT_ABSTRACT: DiagnosticMessage = diag!(1217, Error, "pattern definition may not be abstract");

    // ========================================================================
    // Deprecation warnings (1300-1399)
    // ========================================================================
    pub const DEPRECATED_PROCEDURE_SYNTAX: DiagnosticMessage = diag!(1300, Warning, "Procedure syntax is deprecated. Convert procedure `{0}` to method by adding `: Unit =`.");
    pub const DEPRECATED_PROCEDURE_DECL: DiagnosticMessage = diag!(1301, Warning, "Procedure syntax is deprecated. Convert procedure `{0}` to method by adding `: Unit`.");
    pub const DEPRECATED_VIEW_BOUND: DiagnosticMessage = diag!(1302, Warning, "View bounds are deprecated. Use an implicit parameter instead.");
    pub const DEPRECATED_VAL_IN_FOR: DiagnosticMessage = diag!(1303, Warning, "val keyword in for comprehension is deprecated");
    pub const DEPRECATED_EARLY_TYPE_DEF: DiagnosticMessage = diag!(1304, Warning, "early type members are deprecated. Move them to the regular body: the semantics are the same.");

    // ========================================================================
    // Incomplete input (1900-1999)
    // ========================================================================
    pub const INCOMPLETE_EOF: DiagnosticMessage = diag!(1900, Error, "unexpected end of input: possibly missing '}' or ')'");
    pub const INCOMPLETE_EXPECTED_BUT_EOF: DiagnosticMessage = diag!(1901, Error, "'{0}' expected but end of input found.");
}
