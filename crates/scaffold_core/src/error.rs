//! Error types for room-code handling.

/// Errors produced while parsing or generating invitation codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    /// The text is not a well-formed room code or its checksum is not zero.
    #[error("Invalid room code: {0}")]
    InvalidFormat(String),

    /// Bounded random generation never produced a code with a valid checksum.
    #[error("Room code generation gave up after {attempts} attempts")]
    GenerationExhausted { attempts: usize },

    /// A legacy base-36 online code could not be decoded.
    #[error("Invalid legacy online code: {0}")]
    InvalidLegacyCode(String),
}
