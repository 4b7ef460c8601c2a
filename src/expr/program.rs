use super::token::{BinOp, Token, TokenKind, Tokens};
use crate::{
    error::{Error, EvalError},
    registry::{Registry, Term},
};
use miette::SourceSpan;
use simsearch::SimSearch;
use std::sync::Arc;

/// Capacity of the evaluator's value stack.
pub const MAX_STACK: usize = 64;

/// How term parameter slices are numbered in a compiled program.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Layout {
    /// Slices are read from the full registry-ordered parameter vector.
    Global,
    /// Slices are renumbered into a compact vector holding only the referenced terms, in
    /// order of first appearance in the formula.
    Local,
}

#[derive(Debug, Clone)]
enum Op {
    Num(f64),
    Term { term: Arc<Term>, offset: usize },
    Bin(BinOp),
}

/// A global parameter range copied into a local vector.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Binding {
    global: usize,
    arity: usize,
}

/// A formula compiled to postfix order.
///
/// Evaluation is pure: the program is never mutated and can be shared between threads.
#[derive(Debug, Clone)]
pub struct Program {
    formula: String,
    ops: Vec<Op>,
    layout: Layout,
    bindings: Vec<Binding>,
    params_len: usize,
    depth: usize,
}

enum Pending {
    Op(BinOp),
    LParen { offset: usize },
}

/// Compile tokens to a postfix program using the shunting-yard algorithm.
///
/// Term names are leaf operands, evaluated against `x` and their own parameter slice.
/// Each occurrence of a term refers to the same slice.
///
/// Operands and operators must alternate. A trailing operator is left for
/// [`Program::verify`] to report as a stack underflow.
pub fn compile(tokens: &Tokens, registry: &Registry, layout: Layout) -> Result<Program, Error> {
    let src = tokens.src();
    let mut ops = Vec::with_capacity(tokens.len());
    let mut pending: Vec<Pending> = Vec::new();
    // true at the start, after an operator, and after '('
    let mut want_operand = true;

    let unexpected = |tok: &Token, expected: &'static str| Error::UnexpectedToken {
        found: tok.to_string(),
        expected,
        src: src.to_string(),
        span: (tok.offset, tok.len).into(),
    };

    // (term, local offset) by first appearance
    let mut locals: Vec<(Arc<Term>, usize)> = Vec::new();
    let mut local_len = 0;

    for tok in tokens.iter() {
        let span: SourceSpan = (tok.offset, tok.len).into();
        match &tok.kind {
            TokenKind::Number(_) | TokenKind::Ident(_) | TokenKind::LParen if !want_operand => {
                return Err(unexpected(tok, "an operator"))
            }
            TokenKind::Op(_) if want_operand => return Err(unexpected(tok, "an operand")),
            TokenKind::Number(text) => {
                let v = text.parse::<f64>().map_err(|_| Error::MalformedNumber {
                    text: text.clone(),
                    src: src.to_string(),
                    span,
                })?;
                ops.push(Op::Num(v));
                want_operand = false;
            }
            TokenKind::Ident(name) => {
                let term = registry
                    .get(name)
                    .ok_or_else(|| Error::UnknownIdentifier {
                        name: name.clone(),
                        src: src.to_string(),
                        span,
                        suggestion: suggest(name, registry),
                    })?
                    .clone();

                let offset = match layout {
                    Layout::Global => term.offset(),
                    Layout::Local => match locals.iter().find(|(t, _)| Arc::ptr_eq(t, &term)) {
                        Some((_, o)) => *o,
                        None => {
                            let o = local_len;
                            local_len += term.arity();
                            locals.push((term.clone(), o));
                            o
                        }
                    },
                };
                ops.push(Op::Term { term, offset });
                want_operand = false;
            }
            TokenKind::LParen => pending.push(Pending::LParen { offset: tok.offset }),
            TokenKind::RParen => {
                loop {
                    match pending.pop() {
                        Some(Pending::Op(op)) => ops.push(Op::Bin(op)),
                        Some(Pending::LParen { .. }) => break,
                        None => {
                            return Err(Error::UnbalancedParen {
                                src: src.to_string(),
                                span,
                            })
                        }
                    }
                }
                if want_operand {
                    return Err(unexpected(tok, "an operand"));
                }
            }
            TokenKind::Op(op) => {
                while let Some(Pending::Op(top)) = pending.last() {
                    if top.precedence() < op.precedence() {
                        break;
                    }
                    ops.push(Op::Bin(*top));
                    pending.pop();
                }
                pending.push(Pending::Op(*op));
                want_operand = true;
            }
            TokenKind::Other(ch) => {
                return Err(Error::UnexpectedCharacter {
                    ch: *ch,
                    src: src.to_string(),
                    span,
                })
            }
        }
    }

    while let Some(p) = pending.pop() {
        match p {
            Pending::Op(op) => ops.push(Op::Bin(op)),
            Pending::LParen { offset } => {
                return Err(Error::UnbalancedParen {
                    src: src.to_string(),
                    span: (offset, 1).into(),
                })
            }
        }
    }

    let depth = max_depth(&ops);
    if depth > MAX_STACK {
        return Err(Error::ExpressionTooDeep {
            depth,
            max: MAX_STACK,
        });
    }

    let (bindings, params_len) = match layout {
        Layout::Global => (Vec::new(), registry.params_len()),
        Layout::Local => (
            locals
                .iter()
                .map(|(t, _)| Binding {
                    global: t.offset(),
                    arity: t.arity(),
                })
                .collect(),
            local_len,
        ),
    };

    Ok(Program {
        formula: src.to_string(),
        ops,
        layout,
        bindings,
        params_len,
        depth,
    })
}

/// Stack slots needed, counting an underflowing operator as if it had its operands.
fn max_depth(ops: &[Op]) -> usize {
    let mut len = 0usize;
    let mut max = 0;
    for op in ops {
        len = match op {
            Op::Num(_) | Op::Term { .. } => len + 1,
            Op::Bin(_) => len.max(2) - 1,
        };
        max = max.max(len);
    }
    max
}

fn suggest(name: &str, registry: &Registry) -> Option<String> {
    let mut engine: SimSearch<usize> = SimSearch::new();
    for (i, t) in registry.terms().iter().enumerate() {
        engine.insert(i, t.name());
    }

    engine
        .search(name)
        .first()
        .map(|i| format!("did you mean '{}'?", registry.terms()[*i].name()))
}

impl Program {
    /// The source formula.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Length of the parameter vector [`Program::evaluate`] expects.
    pub fn params_len(&self) -> usize {
        self.params_len
    }

    /// Value stack slots used during evaluation.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Names of the referenced terms, by first appearance.
    pub fn terms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for op in &self.ops {
            if let Op::Term { term, .. } = op {
                if !names.contains(&term.name()) {
                    names.push(term.name());
                }
            }
        }
        names
    }

    /// Postfix rendering, space separated.
    pub fn postfix(&self) -> String {
        self.ops
            .iter()
            .map(|op| match op {
                Op::Num(v) => v.to_string(),
                Op::Term { term, .. } => term.name().to_string(),
                Op::Bin(op) => op.symbol().to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build this program's parameter vector from the global one.
    ///
    /// For a [`Layout::Global`] program this is a copy; for [`Layout::Local`] the referenced
    /// slices are concatenated.
    pub fn bind(&self, global: &[f64]) -> Result<Vec<f64>, EvalError> {
        match self.layout {
            Layout::Global => {
                if global.len() < self.params_len {
                    return Err(EvalError::MissingParameters {
                        expected: self.params_len,
                        found: global.len(),
                    });
                }
                Ok(global[..self.params_len].to_vec())
            }
            Layout::Local => {
                let mut local = Vec::with_capacity(self.params_len);
                for b in &self.bindings {
                    let slice = global.get(b.global..b.global + b.arity).ok_or(
                        EvalError::MissingParameters {
                            expected: b.global + b.arity,
                            found: global.len(),
                        },
                    )?;
                    local.extend_from_slice(slice);
                }
                Ok(local)
            }
        }
    }

    /// Check stack discipline without evaluating any term.
    pub fn verify(&self) -> Result<(), EvalError> {
        let mut len = 0usize;
        for (position, op) in self.ops.iter().enumerate() {
            match op {
                Op::Num(_) | Op::Term { .. } => len += 1,
                Op::Bin(op) => {
                    if len < 2 {
                        return Err(EvalError::StackUnderflow {
                            position,
                            op: op.symbol(),
                        });
                    }
                    len -= 1;
                }
            }
        }

        match len {
            1 => Ok(()),
            remaining => Err(EvalError::MalformedProgram { remaining }),
        }
    }

    /// Evaluate the program at `x`.
    ///
    /// Uses a fixed-size value stack and does not allocate.
    pub fn evaluate(&self, params: &[f64], x: f64) -> Result<f64, EvalError> {
        if params.len() < self.params_len {
            return Err(EvalError::MissingParameters {
                expected: self.params_len,
                found: params.len(),
            });
        }

        let mut stack = [0f64; MAX_STACK];
        let mut len = 0;

        for (position, op) in self.ops.iter().enumerate() {
            match op {
                Op::Num(v) => {
                    stack[len] = *v;
                    len += 1;
                }
                Op::Term { term, offset } => {
                    stack[len] = term.evaluate(x, &params[*offset..*offset + term.arity()]);
                    len += 1;
                }
                Op::Bin(op) => {
                    if len < 2 {
                        return Err(EvalError::StackUnderflow {
                            position,
                            op: op.symbol(),
                        });
                    }
                    let b = stack[len - 1];
                    let a = stack[len - 2];
                    len -= 1;
                    stack[len - 1] = op.apply(a, b);
                }
            }
        }

        match len {
            1 => Ok(stack[0]),
            remaining => Err(EvalError::MalformedProgram { remaining }),
        }
    }
}
