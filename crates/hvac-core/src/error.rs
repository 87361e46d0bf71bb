//! `HvacError`: the concrete realization of the client error taxonomy —
//! config failures are fatal at init, bootstrap/transport failures collapse
//! to `-1` at the shim boundary, remote failures pass the server's code
//! through, and a wait that outlives its deadline is `Timeout`.

#[derive(Debug, thiserror::Error)]
pub enum HvacError {
    #[error("configuration error: {0}")]
    Config(#[from] hvac_config::ConfigError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("wire codec error: {0}")]
    Wire(#[from] hvac_wire::WireError),
    #[error("remote error: {0}")]
    Remote(i32),
    #[error("timed out waiting for fd {0} to become ready")]
    Timeout(i32),
    #[error("fd {0} is not tracked")]
    NotTracked(i32),
}

pub type Result<T> = std::result::Result<T, HvacError>;
