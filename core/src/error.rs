use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Data load error: {0}")]
    DataLoad(String),

    #[error("Schema error: required columns missing after normalization: {missing:?}")]
    Schema { missing: Vec<String> },

    #[error("Plan validation error: {0}")]
    PlanValidation(String),

    #[error("Plan compilation error: {0}")]
    PlanCompilation(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Capability '{name}' failed after {attempts} attempt(s): {reason}")]
    Capability {
        name:     &'static str,
        attempts: u32,
        reason:   String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InsightError {
    /// Fatal errors abort the current question; everything else is
    /// captured as a structured error payload.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InsightError::DataLoad(_) | InsightError::Schema { .. }
        )
    }

    /// One human-readable sentence for the person asking the question.
    /// Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            InsightError::DataLoad(_) => {
                "The transaction dataset could not be loaded, so the question cannot be answered right now.".to_string()
            }
            InsightError::Schema { missing } => format!(
                "The transaction dataset is missing required columns ({}).",
                missing.join(", ")
            ),
            InsightError::PlanValidation(msg) => {
                format!("The question referred to something the dataset does not contain: {msg}.")
            }
            InsightError::PlanCompilation(_) => {
                "The question could not be fully understood.".to_string()
            }
            InsightError::Analysis(msg) => format!("The analysis could not be completed: {msg}."),
            InsightError::Capability { name, .. } => {
                format!("The {name} service did not respond in time.")
            }
            InsightError::Serialization(_) | InsightError::Other(_) => {
                "Something went wrong while answering the question.".to_string()
            }
        }
    }
}

pub type InsightResult<T> = Result<T, InsightError>;
