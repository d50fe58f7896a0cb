use chumsky::prelude::*;
use std::str::FromStr;

use crate::error::{FormulaError, Result};

type ParseExtra<'a> = chumsky::extra::Err<chumsky::error::Simple<'a, char>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Interact(Box<Expr>, Box<Expr>),
    Cross(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn visit_vars<'e>(&'e self, out: &mut Vec<&'e str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(name) => out.push(name),
            Expr::Call(_, args) => {
                for arg in args {
                    arg.visit_vars(out);
                }
            }
            Expr::Neg(e) => e.visit_vars(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Interact(a, b)
            | Expr::Cross(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b) => {
                a.visit_vars(out);
                b.visit_vars(out);
            }
        }
    }
}

/// Splits `"<lhs> ~ <rhs>"` into trimmed sides.
pub fn split_formula(formula: &str) -> Result<(String, String)> {
    let mut parts = formula.split('~');
    let (Some(lhs), Some(rhs)) = (parts.next(), parts.next()) else {
        return Err(FormulaError::syntax(
            formula,
            "formula should contain '~'",
        ));
    };
    if parts.next().is_some() {
        return Err(FormulaError::syntax(
            formula,
            "formula should contain exactly one '~'",
        ));
    }
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    if lhs.is_empty() {
        return Err(FormulaError::syntax(formula, "left-hand side is empty"));
    }
    if rhs.is_empty() {
        return Err(FormulaError::syntax(formula, "right-hand side is empty"));
    }
    Ok((lhs.to_string(), rhs.to_string()))
}

fn any_char<'a>() -> impl Parser<'a, &'a str, char, ParseExtra<'a>> + Copy {
    any()
}

fn ident_parser<'a>() -> impl Parser<'a, &'a str, String, ParseExtra<'a>> + Clone {
    let ident_start = any_char().filter(|c: &char| c.is_alphabetic() || *c == '_');
    let ident_rest = any_char()
        .filter(|c: &char| c.is_alphanumeric() || *c == '_' || *c == '.')
        .repeated()
        .collect::<String>();
    let bare = ident_start.then(ident_rest).map(|(first, rest)| {
        let mut s = String::new();
        s.push(first);
        s.push_str(&rest);
        s
    });
    // `quoted name` lets columns with spaces or operators be referenced
    let quoted = any_char()
        .filter(|c: &char| *c != '`')
        .repeated()
        .at_least(1)
        .collect::<String>()
        .delimited_by(just('`'), just('`'));
    quoted.or(bare).padded()
}

fn number_parser<'a>() -> impl Parser<'a, &'a str, f64, ParseExtra<'a>> + Clone {
    let digits = any_char()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .collect::<String>();
    digits
        .then(just('.').ignore_then(digits).or_not())
        .map(|(int, frac)| {
            let mut s = int;
            if let Some(frac) = frac {
                s.push('.');
                s.push_str(&frac);
            }
            f64::from_str(&s).unwrap_or(f64::NAN)
        })
        .padded()
}

/// Parses a right-hand-side expression such as `age + C(sex) * log(bmi) + I(age ** 2) - 1`.
pub fn parse_formula(rhs: &str) -> Result<Expr> {
    use chumsky::pratt::*;

    let ident = ident_parser();
    let number = number_parser();

    let expr_parser = recursive(|expr| {
        let call = ident
            .clone()
            .then(
                expr.clone()
                    .separated_by(just(',').padded())
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .map(|(name, args)| Expr::Call(name, args));

        let atom = choice((
            call,
            number.map(Expr::Number),
            ident.clone().map(Expr::Var),
            expr.clone()
                .delimited_by(just('(').padded(), just(')').padded()),
        ))
        .padded();

        let pow_op = just("**").to(()).or(just('^').to(())).padded();
        let mul_op = just('*').and_is(just("**").not()).padded();

        atom.pratt((
            infix(right(5), pow_op, |lhs, _, rhs, _| {
                Expr::Pow(Box::new(lhs), Box::new(rhs))
            }),
            prefix(4, just('-').padded(), |_, rhs, _| Expr::Neg(Box::new(rhs))),
            infix(left(3), just(':').padded(), |lhs, _, rhs, _| {
                Expr::Interact(Box::new(lhs), Box::new(rhs))
            }),
            infix(left(2), mul_op, |lhs, _, rhs, _| {
                Expr::Cross(Box::new(lhs), Box::new(rhs))
            }),
            infix(left(2), just('/').padded(), |lhs, _, rhs, _| {
                Expr::Div(Box::new(lhs), Box::new(rhs))
            }),
            infix(left(1), just('+').padded(), |lhs, _, rhs, _| {
                Expr::Add(Box::new(lhs), Box::new(rhs))
            }),
            infix(left(1), just('-').padded(), |lhs, _, rhs, _| {
                Expr::Sub(Box::new(lhs), Box::new(rhs))
            }),
        ))
    });

    expr_parser
        .then_ignore(end())
        .parse(rhs)
        .into_result()
        .map_err(|errs| {
            let msg = errs
                .into_iter()
                .map(|e: chumsky::error::Simple<char>| {
                    format!("parse error at {:?}: found {:?}", e.span(), e.found())
                })
                .collect::<Vec<_>>()
                .join("; ");
            FormulaError::syntax(rhs, msg)
        })
}
