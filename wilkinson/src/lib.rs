pub mod error;
pub mod materialize;
pub mod parser;
pub mod terms;

pub use error::{FormulaError, Result};
pub use materialize::{INTERCEPT, ModelMatrix, NaAction, model_matrix};
pub use parser::{Expr, parse_formula, split_formula};
pub use terms::{Arith, ArithOp, Factor, Term, TermList, required_variables};
