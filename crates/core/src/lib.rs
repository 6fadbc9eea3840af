#![forbid(unsafe_code)]

mod artefact;
mod bucket;
mod config;
mod model;
mod plan;
mod view;

pub use artefact::*;
pub use bucket::*;
pub use config::*;
pub use model::*;
pub use plan::*;
pub use view::*;

pub mod ids {
    /// Report node, resolved plan node and execution ids share one shape: a short, printable,
    /// pipe-free token (Mongo object ids in practice).
    pub fn canonical_identifier(
        field: &'static str,
        value: impl Into<String>,
    ) -> Result<String, IdentifierError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty { field });
        }
        if trimmed.len() > 256 {
            return Err(IdentifierError::TooLong { field });
        }
        for (index, ch) in trimmed.chars().enumerate() {
            if ch.is_control() || ch == '|' || ch.is_whitespace() {
                return Err(IdentifierError::InvalidChar { field, ch, index });
            }
        }
        Ok(trimmed.to_string())
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IdentifierError {
        Empty {
            field: &'static str,
        },
        TooLong {
            field: &'static str,
        },
        InvalidChar {
            field: &'static str,
            ch: char,
            index: usize,
        },
    }

    impl IdentifierError {
        pub fn field(&self) -> &'static str {
            match self {
                Self::Empty { field } | Self::TooLong { field } | Self::InvalidChar { field, .. } => {
                    field
                }
            }
        }
    }

    impl std::fmt::Display for IdentifierError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty { field } => write!(f, "{field} must not be empty"),
                Self::TooLong { field } => write!(f, "{field} is too long"),
                Self::InvalidChar { field, ch, index } => {
                    write!(f, "{field} contains invalid char {ch:?} at {index}")
                }
            }
        }
    }

    impl std::error::Error for IdentifierError {}

}
