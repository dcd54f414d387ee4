use thiserror::Error;

/// Any error that can occur while querying a Teeworlds server.
#[derive(Debug, Error)]
pub enum TeeQueryError {
    /// Failed to bind a local UDP port for the query socket.
    #[error("failed to bind local port: {0}")]
    FailedPortBind(std::io::Error),

    /// DNS lookup for the server address failed outright.
    #[error("failed to resolve host: {0}")]
    ResolutionError(std::io::Error),

    /// DNS lookup succeeded but returned no usable IPv4 address.
    #[error("no IPv4 address for host: {0}")]
    UnresolvedHost(String),

    /// Failed to send the request datagram.
    #[error("failed to send request: {0}")]
    SendError(std::io::Error),

    /// Failed to receive a response datagram.
    #[error("failed to receive response: {0}")]
    ReceiveError(std::io::Error),

    /// A send or receive did not complete within the caller's deadline.
    #[error("connection timed out: {0}")]
    TimeoutError(#[from] tokio::time::error::Elapsed),

    /// The OS randomness source failed while drawing request tokens.
    /// Fatal to the request; tokens are never reused or made up.
    #[error("failed to draw request tokens: {0}")]
    RandomnessError(#[from] rand::Error),

    /// The response echoed a token whose low byte does not match the
    /// token sent in the request.
    #[error("server sent an invalid token: got {got}, expected {expected}")]
    InvalidToken { got: u8, expected: u8 },

    /// The response echoed an extra token (bits 8..24 of the token field)
    /// that does not match the request. Only checked for the extended
    /// protocol variants.
    #[error("server sent an invalid extra token: got {got}, expected {expected}")]
    InvalidExtraToken { got: u16, expected: u16 },
}
