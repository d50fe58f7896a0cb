use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("syntax error in formula `{formula}`: {message}")]
    Syntax { formula: String, message: String },

    #[error("cannot materialize formula `{formula}`: {message}")]
    Materialization { formula: String, message: String },

    #[error("cannot evaluate formula `{formula}`: {message}")]
    Evaluation { formula: String, message: String },
}

impl FormulaError {
    pub fn syntax(formula: &str, message: impl Into<String>) -> Self {
        Self::Syntax {
            formula: formula.to_string(),
            message: message.into(),
        }
    }

    pub fn materialization(formula: &str, message: impl Into<String>) -> Self {
        Self::Materialization {
            formula: formula.to_string(),
            message: message.into(),
        }
    }

    pub fn evaluation(formula: &str, message: impl Into<String>) -> Self {
        Self::Evaluation {
            formula: formula.to_string(),
            message: message.into(),
        }
    }

    pub fn formula(&self) -> &str {
        match self {
            Self::Syntax { formula, .. }
            | Self::Materialization { formula, .. }
            | Self::Evaluation { formula, .. } => formula,
        }
    }
}

pub type Result<T> = std::result::Result<T, FormulaError>;
