//! Error classification module
//!
//! Reduces any failure a campaign step reports to one of the seven canonical
//! [`ErrorKind`]s. Collaborator-specific error types are rendered to a plain
//! string with [`describe_error`] at the boundary, so the classifier only ever
//! sees text.

pub mod classification;
pub mod detector;

pub use classification::{ClassifiedError, ErrorKind, ParseErrorKindError};
pub use detector::{describe_error, ErrorClassifier, KeywordRule};
