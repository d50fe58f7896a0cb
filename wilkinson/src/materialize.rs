use std::collections::{BTreeSet, HashMap};

use ndarray::Array2;
use polars::prelude::*;

use crate::error::{FormulaError, Result};
use crate::terms::{Arith, Factor, TermList};

pub const INTERCEPT: &str = "Intercept";

/// What to do with rows that contain missing values after materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaAction {
    /// Keep the row; missing entries become NaN.
    Ignore,
    Drop,
    Raise,
}

#[derive(Debug, Clone)]
pub struct ModelMatrix {
    pub matrix: Array2<f64>,
    pub column_names: Vec<String>,
    /// Term label (as written, e.g. `sex` or `age:C(site)`) to generated column indices.
    pub term_columns: Vec<(String, Vec<usize>)>,
}

impl ModelMatrix {
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }
}

#[derive(Debug, Clone)]
enum FactorValues {
    Numeric(Vec<f64>),
    Categorical {
        codes: Vec<Option<usize>>,
        levels: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coding {
    Full,
    Reduced,
}

pub fn model_matrix(rhs: &str, data: &DataFrame, na_action: NaAction) -> Result<ModelMatrix> {
    let terms = TermList::parse(rhs)?;
    let n = data.height();

    let mut cache: HashMap<Factor, FactorValues> = HashMap::new();
    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut term_columns = Vec::new();

    if terms.intercept {
        names.push(INTERCEPT.to_string());
        columns.push(vec![1.0; n]);
        term_columns.push((INTERCEPT.to_string(), vec![0]));
    }

    let mut full_rank_spent = terms.intercept;
    for term in &terms.terms {
        let mut blocks: Vec<Vec<(String, Vec<f64>)>> = Vec::with_capacity(term.factors.len());
        for factor in &term.factors {
            if !cache.contains_key(factor) {
                let values = evaluate(factor, data, rhs)?;
                cache.insert(factor.clone(), values);
            }
            let values = &cache[factor];
            let coding = match values {
                FactorValues::Categorical { .. } if !full_rank_spent && term.degree() == 1 => {
                    full_rank_spent = true;
                    Coding::Full
                }
                _ => Coding::Reduced,
            };
            blocks.push(encode(factor, values, coding));
        }

        let mut generated = vec![(String::new(), vec![1.0; n])];
        for block in blocks {
            let mut next = Vec::with_capacity(generated.len() * block.len());
            for (left_name, left) in &generated {
                for (right_name, right) in &block {
                    let name = if left_name.is_empty() {
                        right_name.clone()
                    } else {
                        format!("{left_name}:{right_name}")
                    };
                    let values = left.iter().zip(right).map(|(a, b)| a * b).collect();
                    next.push((name, values));
                }
            }
            generated = next;
        }

        let mut indices = Vec::with_capacity(generated.len());
        for (name, values) in generated {
            indices.push(names.len());
            names.push(name);
            columns.push(values);
        }
        term_columns.push((term.label(), indices));
    }

    let mut keep: Vec<usize> = (0..n).collect();
    let incomplete: BTreeSet<usize> = (0..n)
        .filter(|&row| columns.iter().any(|c| c[row].is_nan()))
        .collect();
    match na_action {
        NaAction::Ignore => {}
        NaAction::Drop => keep.retain(|row| !incomplete.contains(row)),
        NaAction::Raise => {
            if let Some(first) = incomplete.first() {
                return Err(FormulaError::materialization(
                    rhs,
                    format!(
                        "{} rows contain missing values (first at row {first})",
                        incomplete.len()
                    ),
                ));
            }
        }
    }

    let mut matrix = Array2::<f64>::zeros((keep.len(), columns.len()));
    for (j, col) in columns.iter().enumerate() {
        for (i, &row) in keep.iter().enumerate() {
            matrix[[i, j]] = col[row];
        }
    }

    Ok(ModelMatrix {
        matrix,
        column_names: names,
        term_columns,
    })
}

fn encode(factor: &Factor, values: &FactorValues, coding: Coding) -> Vec<(String, Vec<f64>)> {
    let label = factor.label();
    match values {
        FactorValues::Numeric(v) => vec![(label, v.clone())],
        FactorValues::Categorical { codes, levels } => {
            let start = match coding {
                Coding::Full => 0,
                Coding::Reduced => 1,
            };
            levels
                .iter()
                .enumerate()
                .skip(start)
                .map(|(level_idx, level)| {
                    let name = match coding {
                        Coding::Full => format!("{label}[{level}]"),
                        Coding::Reduced => format!("{label}[T.{level}]"),
                    };
                    let column = codes
                        .iter()
                        .map(|code| match code {
                            Some(c) if *c == level_idx => 1.0,
                            Some(_) => 0.0,
                            None => f64::NAN,
                        })
                        .collect();
                    (name, column)
                })
                .collect()
        }
    }
}

fn evaluate(factor: &Factor, data: &DataFrame, rhs: &str) -> Result<FactorValues> {
    match factor {
        Factor::Column(name) => column_values(data, name, rhs),
        Factor::Transform { func, arg } => {
            let inner = evaluate(arg, data, rhs)?;
            apply_transform(func, inner, rhs)
        }
        Factor::Identity(expr) => evaluate_arith(expr, data, rhs).map(FactorValues::Numeric),
    }
}

fn evaluate_arith(expr: &Arith, data: &DataFrame, rhs: &str) -> Result<Vec<f64>> {
    match expr {
        Arith::Number(bits) => Ok(vec![f64::from_bits(*bits); data.height()]),
        Arith::Factor(factor) => match evaluate(factor, data, rhs)? {
            FactorValues::Numeric(values) => Ok(values),
            FactorValues::Categorical { .. } => Err(FormulaError::evaluation(
                rhs,
                format!("`{}` is categorical and cannot be used in I()", factor.label()),
            )),
        },
        Arith::Neg(inner) => Ok(evaluate_arith(inner, data, rhs)?
            .into_iter()
            .map(|v| -v)
            .collect()),
        Arith::Binary(op, a, b) => {
            let a = evaluate_arith(a, data, rhs)?;
            let b = evaluate_arith(b, data, rhs)?;
            Ok(a.iter().zip(&b).map(|(x, y)| op.apply(*x, *y)).collect())
        }
    }
}

fn column_values(data: &DataFrame, name: &str, rhs: &str) -> Result<FactorValues> {
    let column = data.column(name).map_err(|_| {
        FormulaError::materialization(rhs, format!("column `{name}` is not present in the data"))
    })?;
    let eval_err = |e: PolarsError| FormulaError::evaluation(rhs, format!("column `{name}`: {e}"));

    match column.dtype() {
        DataType::String => {
            let values: Vec<Option<String>> = column
                .str()
                .map_err(eval_err)?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect();
            Ok(categorical_from(values))
        }
        DataType::Boolean => {
            let values: Vec<Option<String>> = column
                .bool()
                .map_err(eval_err)?
                .into_iter()
                .map(|v| v.map(|b| if b { "True" } else { "False" }.to_string()))
                .collect();
            Ok(categorical_from(values))
        }
        _ => match column.cast(&DataType::Float64) {
            Ok(casted) => {
                let values = casted
                    .f64()
                    .map_err(eval_err)?
                    .into_iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect();
                Ok(FactorValues::Numeric(values))
            }
            Err(_) => {
                let casted = column.cast(&DataType::String).map_err(eval_err)?;
                let values: Vec<Option<String>> = casted
                    .str()
                    .map_err(eval_err)?
                    .into_iter()
                    .map(|v| v.map(str::to_string))
                    .collect();
                Ok(categorical_from(values))
            }
        },
    }
}

fn categorical_from(values: Vec<Option<String>>) -> FactorValues {
    let levels: Vec<String> = values
        .iter()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let codes = values
        .iter()
        .map(|v| v.as_ref().and_then(|s| levels.binary_search(s).ok()))
        .collect();
    FactorValues::Categorical { codes, levels }
}

fn format_level(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

fn apply_transform(func: &str, values: FactorValues, rhs: &str) -> Result<FactorValues> {
    if func == "C" {
        return Ok(match values {
            FactorValues::Numeric(v) => {
                let mut distinct: Vec<f64> = v.iter().copied().filter(|x| !x.is_nan()).collect();
                distinct.sort_by(|a, b| a.total_cmp(b));
                distinct.dedup();
                let levels = distinct.iter().map(|x| format_level(*x)).collect();
                let codes = v
                    .iter()
                    .map(|x| {
                        if x.is_nan() {
                            None
                        } else {
                            distinct.iter().position(|d| d == x)
                        }
                    })
                    .collect();
                FactorValues::Categorical { codes, levels }
            }
            categorical => categorical,
        });
    }

    let FactorValues::Numeric(v) = values else {
        return Err(FormulaError::evaluation(
            rhs,
            format!("function `{func}` requires a numeric argument"),
        ));
    };
    let out: Vec<f64> = match func {
        "log" => v.iter().map(|x| x.ln()).collect(),
        "log10" => v.iter().map(|x| x.log10()).collect(),
        "log2" => v.iter().map(|x| x.log2()).collect(),
        "exp" => v.iter().map(|x| x.exp()).collect(),
        "sqrt" => v.iter().map(|x| x.sqrt()).collect(),
        "abs" => v.iter().map(|x| x.abs()).collect(),
        "center" => {
            let (mean, _) = mean_sd(&v);
            v.iter().map(|x| x - mean).collect()
        }
        "scale" => {
            let (mean, sd) = mean_sd(&v);
            v.iter().map(|x| (x - mean) / sd).collect()
        }
        other => {
            return Err(FormulaError::evaluation(
                rhs,
                format!("unknown function `{other}`"),
            ));
        }
    };
    Ok(FactorValues::Numeric(out))
}

/// NaN-skipping mean and sample standard deviation.
fn mean_sd(values: &[f64]) -> (f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    let n = finite.len() as f64;
    if finite.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = finite.iter().sum::<f64>() / n;
    let var = if finite.len() > 1 {
        finite.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        f64::NAN
    };
    (mean, var.sqrt())
}
