use miette::{Diagnostic, SourceSpan};

/// Errors raised while building, compiling, or rendering a model.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error("term name '{name}' is not an identifier")]
    #[diagnostic(
        code(termfit::invalid_term_name),
        help("names start with a letter or '_' and continue with letters, digits or '_'")
    )]
    InvalidTermName { name: String },

    #[error("term '{name}' is already registered")]
    #[diagnostic(code(termfit::duplicate_term))]
    DuplicateTerm { name: String },

    #[error("cannot register term '{name}': the registry is frozen")]
    #[diagnostic(
        code(termfit::registry_frozen),
        help("all terms must be added before the first formula is compiled")
    )]
    RegistryFrozen { name: String },

    #[error("unknown basis function '{kind}'")]
    #[diagnostic(
        code(termfit::unknown_basis),
        help("expected one of pol0..pol9, gaus, lednicky")
    )]
    UnknownBasis { kind: String },

    #[error("term '{name}' takes {expected} parameters but {found} were supplied")]
    #[diagnostic(code(termfit::arity_mismatch))]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown identifier '{name}'")]
    #[diagnostic(code(termfit::unknown_identifier))]
    UnknownIdentifier {
        name: String,
        #[source_code]
        src: String,
        #[label("not a registered term")]
        span: SourceSpan,
        #[help]
        suggestion: Option<String>,
    },

    #[error("malformed number '{text}'")]
    #[diagnostic(code(termfit::malformed_number))]
    MalformedNumber {
        text: String,
        #[source_code]
        src: String,
        #[label("cannot be read as a number")]
        span: SourceSpan,
    },

    #[error("unexpected character '{ch}'")]
    #[diagnostic(
        code(termfit::unexpected_character),
        help("supported operators are + - * / and parentheses")
    )]
    UnexpectedCharacter {
        ch: char,
        #[source_code]
        src: String,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("expected {expected}, found '{found}'")]
    #[diagnostic(code(termfit::unexpected_token))]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        #[source_code]
        src: String,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("unbalanced parenthesis")]
    #[diagnostic(code(termfit::unbalanced_paren))]
    UnbalancedParen {
        #[source_code]
        src: String,
        #[label("no matching parenthesis")]
        span: SourceSpan,
    },

    #[error("expression needs {depth} stack slots, at most {max} are supported")]
    #[diagnostic(code(termfit::too_deep))]
    ExpressionTooDeep { depth: usize, max: usize },

    #[error("operator '{op}' at program position {position} has fewer than two operands")]
    #[diagnostic(code(termfit::stack_underflow))]
    StackUnderflow { position: usize, op: char },

    #[error("program left {remaining} values on the stack, expected exactly one")]
    #[diagnostic(code(termfit::malformed_program))]
    MalformedProgram { remaining: usize },

    #[error("parameter vector has {found} values, the program needs {expected}")]
    #[diagnostic(code(termfit::missing_parameters))]
    MissingParameters { expected: usize, found: usize },

    #[error("no model formula has been compiled")]
    #[diagnostic(code(termfit::not_compiled))]
    NotCompiled,

    #[error("the model has not been fitted")]
    #[diagnostic(code(termfit::not_fitted), help("call `fit` before drawing components"))]
    NotFitted,
}

/// Failure of a single program evaluation.
///
/// Kept `Copy` so the evaluation loop never allocates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("operator '{op}' at program position {position} has fewer than two operands")]
    StackUnderflow { position: usize, op: char },

    #[error("program left {remaining} values on the stack, expected exactly one")]
    MalformedProgram { remaining: usize },

    #[error("parameter vector has {found} values, the program needs {expected}")]
    MissingParameters { expected: usize, found: usize },
}

impl From<EvalError> for Error {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::StackUnderflow { position, op } => Error::StackUnderflow { position, op },
            EvalError::MalformedProgram { remaining } => Error::MalformedProgram { remaining },
            EvalError::MissingParameters { expected, found } => {
                Error::MissingParameters { expected, found }
            }
        }
    }
}

/// An initial parameter value outside its bounds, which was moved to the range midpoint.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Diagnostic)]
#[error("initial value {initial} of parameter '{param}' (term '{term}') is outside [{lower}, {upper}], using {clamped}")]
#[diagnostic(code(termfit::parameter_out_of_range), severity(Warning))]
pub struct ParameterOutOfRangeWarning {
    pub term: String,
    pub param: String,
    pub initial: f64,
    pub lower: f64,
    pub upper: f64,
    pub clamped: f64,
}
