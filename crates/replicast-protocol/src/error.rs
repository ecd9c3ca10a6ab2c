//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A line with no tag at all.
    #[error("empty line")]
    EmptyLine,

    /// The tag does not name any known message kind.
    #[error("unknown message tag: {0:?}")]
    UnknownTag(String),

    /// An argument cannot be put on the wire, or a required argument
    /// cannot be parsed.
    ///
    /// On encode this means the argument contains the separator, the
    /// terminator or non-ASCII text. On decode it means a required
    /// identifier (net id, owner, contract) is not a number.
    #[error("invalid argument {index}: {reason}")]
    InvalidArgument {
        /// Position of the argument in the message.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// The message is well formed text but breaks protocol rules,
    /// e.g. a Command with no sub-command.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
