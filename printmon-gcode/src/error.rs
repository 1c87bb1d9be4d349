use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcodeError {
    /// The line matched a command prefix but one of its numeric arguments
    /// could not be read as a number.
    #[error("Ambiguous {axis} argument {raw:?} in line {line:?}")]
    ParseAmbiguity {
        line: String,
        axis: char,
        raw: String,
    },
}

pub type Result<T> = std::result::Result<T, GcodeError>;
