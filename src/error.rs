use thiserror::Error;
use wilkinson::FormulaError;

#[derive(Debug, Error)]
pub enum NeuroVoxelError {
    #[error("invalid formula `{formula}`: {message}")]
    FormulaSyntax { formula: String, message: String },

    #[error("cannot materialize formula `{formula}`: {message}")]
    FormulaMaterialization { formula: String, message: String },

    #[error("formula `{formula}` failed: {message}")]
    Formulaic { formula: String, message: String },

    #[error("invalid imaging outcome: {0}")]
    InvalidOutcome(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("collaborator failure: {0}")]
    Collaborator(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NeuroVoxelError {
    pub fn collaborator(err: anyhow::Error) -> Self {
        Self::Collaborator(format!("{err:#}"))
    }

    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::FormulaSyntax { .. }
                | Self::FormulaMaterialization { .. }
                | Self::Formulaic { .. }
                | Self::InvalidOutcome(_)
                | Self::Configuration(_)
                | Self::InsufficientData(_)
        )
    }
}

impl From<FormulaError> for NeuroVoxelError {
    fn from(err: FormulaError) -> Self {
        match err {
            FormulaError::Syntax { formula, message } => Self::FormulaSyntax { formula, message },
            FormulaError::Materialization { formula, message } => {
                Self::FormulaMaterialization { formula, message }
            }
            FormulaError::Evaluation { formula, message } => Self::Formulaic { formula, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, NeuroVoxelError>;
