use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

/// Reasons a GridConnect frame body is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame format `{0}`, expected `X` or `S`")]
    UnknownFormat(char),

    #[error("missing `N` or `R` after identifier")]
    MissingKind,

    #[error("identifier has {digits} hex digits, at most {max} allowed")]
    IdentifierLength { digits: usize, max: usize },

    #[error("identifier {id:#x} exceeds {bits}-bit range")]
    IdentifierRange { id: u32, bits: u8 },

    #[error("invalid hex digit `{0}`")]
    InvalidHex(char),

    #[error("data has an odd number of hex digits")]
    OddData,

    #[error("data carries {0} bytes, at most 8 allowed")]
    DataTooLong(usize),
}
