use std::collections::BTreeSet;

use crate::error::{FormulaError, Result};
use crate::parser::{Expr, parse_formula};

/// One multiplicand of a model term: a raw column, a transform applied to one, or an
/// `I(...)` arithmetic expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Factor {
    Column(String),
    Transform { func: String, arg: Box<Factor> },
    Identity(Arith),
}

impl Factor {
    pub fn label(&self) -> String {
        match self {
            Factor::Column(name) => name.clone(),
            Factor::Transform { func, arg } => match arg.as_ref() {
                Factor::Identity(inner) => format!("{func}({})", inner.render()),
                other => format!("{func}({})", other.label()),
            },
            Factor::Identity(inner) => format!("I({})", inner.render()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Pow => "**",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            ArithOp::Add | ArithOp::Sub => 1,
            ArithOp::Mul | ArithOp::Div => 2,
            ArithOp::Pow => 3,
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Pow => a.powf(b),
        }
    }
}

/// Elementwise arithmetic over numeric factors. Literals are stored as `f64` bits so
/// factors stay hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arith {
    Number(u64),
    Factor(Box<Factor>),
    Neg(Box<Arith>),
    Binary(ArithOp, Box<Arith>, Box<Arith>),
}

impl Arith {
    pub fn number(value: f64) -> Self {
        Arith::Number(value.to_bits())
    }

    pub fn render(&self) -> String {
        match self {
            Arith::Number(bits) => format!("{}", f64::from_bits(*bits)),
            Arith::Factor(f) => f.label(),
            Arith::Neg(inner) => match inner.as_ref() {
                Arith::Binary(..) => format!("-({})", inner.render()),
                other => format!("-{}", other.render()),
            },
            Arith::Binary(op, a, b) => {
                let wrap = |child: &Arith, right: bool| match child {
                    Arith::Binary(inner, ..)
                        if inner.precedence() < op.precedence()
                            || (inner.precedence() == op.precedence()
                                && (right != (*op == ArithOp::Pow))) =>
                    {
                        format!("({})", child.render())
                    }
                    other => other.render(),
                };
                format!("{} {} {}", wrap(a.as_ref(), false), op.symbol(), wrap(b.as_ref(), true))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Term {
    pub factors: Vec<Factor>,
}

impl Term {
    fn single(factor: Factor) -> Self {
        Self {
            factors: vec![factor],
        }
    }

    pub fn label(&self) -> String {
        self.factors
            .iter()
            .map(Factor::label)
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn degree(&self) -> usize {
        self.factors.len()
    }

    fn key(&self) -> BTreeSet<&Factor> {
        self.factors.iter().collect()
    }

    fn interact(&self, other: &Term) -> Term {
        let mut factors = self.factors.clone();
        for f in &other.factors {
            if !factors.contains(f) {
                factors.push(f.clone());
            }
        }
        Term { factors }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Term {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermList {
    pub intercept: bool,
    pub terms: Vec<Term>,
}

#[derive(Debug, Default)]
struct Partial {
    terms: Vec<Term>,
    intercept: Option<bool>,
}

impl Partial {
    fn push(&mut self, term: Term) {
        if !self.terms.contains(&term) {
            self.terms.push(term);
        }
    }
}

impl TermList {
    pub fn parse(rhs: &str) -> Result<Self> {
        let expr = parse_formula(rhs)?;
        Self::from_expr(&expr, rhs)
    }

    pub fn from_expr(expr: &Expr, rhs: &str) -> Result<Self> {
        let partial = expand(expr, rhs)?;
        let mut terms = partial.terms;
        // lower-order terms first, ties keep formula order
        terms.sort_by_key(Term::degree);
        Ok(Self {
            intercept: partial.intercept.unwrap_or(true),
            terms,
        })
    }
}

fn flip(directive: Option<bool>) -> Option<bool> {
    directive.map(|v| !v)
}

fn expand(expr: &Expr, rhs: &str) -> Result<Partial> {
    match expr {
        Expr::Number(v) if *v == 1.0 => Ok(Partial {
            terms: Vec::new(),
            intercept: Some(true),
        }),
        Expr::Number(v) if *v == 0.0 => Ok(Partial {
            terms: Vec::new(),
            intercept: Some(false),
        }),
        Expr::Number(v) => Err(FormulaError::syntax(
            rhs,
            format!("numeric literal {v} is not a valid term"),
        )),
        Expr::Var(_) | Expr::Call(..) => {
            let mut out = Partial::default();
            out.push(Term::single(to_factor(expr, rhs)?));
            Ok(out)
        }
        Expr::Neg(inner) => {
            let inner = expand(inner, rhs)?;
            Ok(Partial {
                terms: Vec::new(),
                intercept: flip(inner.intercept),
            })
        }
        Expr::Add(a, b) => {
            let mut out = expand(a, rhs)?;
            let b = expand(b, rhs)?;
            for t in b.terms {
                out.push(t);
            }
            out.intercept = b.intercept.or(out.intercept);
            Ok(out)
        }
        Expr::Sub(a, b) => {
            let mut out = expand(a, rhs)?;
            let b = expand(b, rhs)?;
            out.terms.retain(|t| !b.terms.contains(t));
            if b.intercept.is_some() {
                out.intercept = flip(b.intercept);
            }
            Ok(out)
        }
        Expr::Interact(a, b) => {
            let a = expand(a, rhs)?;
            let b = expand(b, rhs)?;
            if a.intercept.is_some() || b.intercept.is_some() {
                return Err(FormulaError::syntax(
                    rhs,
                    "intercept literals cannot appear in an interaction",
                ));
            }
            let mut out = Partial::default();
            for ta in &a.terms {
                for tb in &b.terms {
                    out.push(ta.interact(tb));
                }
            }
            Ok(out)
        }
        Expr::Cross(a, b) => {
            let main = Expr::Add(a.clone(), b.clone());
            let inter = Expr::Interact(a.clone(), b.clone());
            expand(&Expr::Add(Box::new(main), Box::new(inter)), rhs)
        }
        // `a / b` nests b within a: a + a:b, with every factor of a in the interaction
        Expr::Div(a, b) => {
            let mut out = expand(a, rhs)?;
            let b = expand(b, rhs)?;
            if b.intercept.is_some() {
                return Err(FormulaError::syntax(
                    rhs,
                    "intercept literals cannot be nested",
                ));
            }
            let outer = out
                .terms
                .iter()
                .fold(Term { factors: Vec::new() }, |acc, t| acc.interact(t));
            for tb in &b.terms {
                out.push(outer.interact(tb));
            }
            Ok(out)
        }
        // `(a + b) ** n` keeps every interaction up to order n
        Expr::Pow(base, exponent) => {
            let degree = match exponent.as_ref() {
                Expr::Number(v) if *v >= 1.0 && v.fract() == 0.0 => *v as usize,
                _ => {
                    return Err(FormulaError::syntax(
                        rhs,
                        "the power of a term must be a positive integer; use I() for arithmetic",
                    ));
                }
            };
            let base = expand(base, rhs)?;
            if base.intercept.is_some() {
                return Err(FormulaError::syntax(
                    rhs,
                    "intercept literals cannot appear in an interaction",
                ));
            }
            let mut out = Partial::default();
            for t in &base.terms {
                out.push(t.clone());
            }
            for _ in 1..degree {
                let current = out.terms.clone();
                for ta in &current {
                    for tb in &base.terms {
                        out.push(ta.interact(tb));
                    }
                }
            }
            Ok(out)
        }
    }
}

fn to_factor(expr: &Expr, rhs: &str) -> Result<Factor> {
    match expr {
        Expr::Var(name) => Ok(Factor::Column(name.clone())),
        Expr::Call(func, args) => {
            let [arg] = args.as_slice() else {
                return Err(FormulaError::syntax(
                    rhs,
                    format!("function `{func}` takes exactly one argument"),
                ));
            };
            if func == "I" {
                return Ok(Factor::Identity(to_arith(arg, rhs)?));
            }
            let arg = match arg {
                Expr::Var(_) | Expr::Call(..) => to_factor(arg, rhs)?,
                arithmetic => Factor::Identity(to_arith(arithmetic, rhs)?),
            };
            Ok(Factor::Transform {
                func: func.clone(),
                arg: Box::new(arg),
            })
        }
        other => Err(FormulaError::syntax(
            rhs,
            format!("unsupported function argument {other:?}"),
        )),
    }
}

fn to_arith(expr: &Expr, rhs: &str) -> Result<Arith> {
    fn binary(op: ArithOp, a: &Expr, b: &Expr, rhs: &str) -> Result<Arith> {
        Ok(Arith::Binary(
            op,
            Box::new(to_arith(a, rhs)?),
            Box::new(to_arith(b, rhs)?),
        ))
    }
    match expr {
        Expr::Number(v) => Ok(Arith::number(*v)),
        Expr::Var(_) | Expr::Call(..) => Ok(Arith::Factor(Box::new(to_factor(expr, rhs)?))),
        Expr::Neg(inner) => Ok(Arith::Neg(Box::new(to_arith(inner, rhs)?))),
        Expr::Add(a, b) => binary(ArithOp::Add, a, b, rhs),
        Expr::Sub(a, b) => binary(ArithOp::Sub, a, b, rhs),
        Expr::Cross(a, b) => binary(ArithOp::Mul, a, b, rhs),
        Expr::Div(a, b) => binary(ArithOp::Div, a, b, rhs),
        Expr::Pow(a, b) => binary(ArithOp::Pow, a, b, rhs),
        Expr::Interact(..) => Err(FormulaError::syntax(
            rhs,
            "`:` is not an arithmetic operator",
        )),
    }
}

/// Column names a right-hand side reads from the data; function names are excluded.
pub fn required_variables(rhs: &str) -> Result<BTreeSet<String>> {
    let expr = parse_formula(rhs)?;
    let mut vars = Vec::new();
    expr.visit_vars(&mut vars);
    Ok(vars.into_iter().map(str::to_string).collect())
}
