//! Crate-wide error and result types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Opening the underlying CAN source failed. Fatal to the owning
    /// forwarder.
    #[error("cannot open transport: {0}")]
    TransportOpen(#[source] std::io::Error),

    /// I/O on an already-open transport failed; the receive stream ends.
    #[error("transport i/o: {0}")]
    TransportIo(#[from] std::io::Error),

    /// A frame or line that does not satisfy the wire format. The input is
    /// discarded and the stream continues.
    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    /// A condition or calculation string that does not lex or parse.
    #[error("expression parse: {0}")]
    ExpressionParse(String),

    /// A well-formed expression that fails at evaluation time, e.g. a type
    /// mismatch between boolean and numeric operands.
    #[error("expression eval: {0}")]
    ExpressionEval(String),

    /// The calculation does not have the byte-literal shape the encoder can
    /// invert into a frame.
    #[error("cannot encode calculation: {0}")]
    EncodeShape(String),
}
