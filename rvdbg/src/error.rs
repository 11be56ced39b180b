use std::time::Duration;

/// Errors reported by the debug transport and run-control layer.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum Error {
    /// Hart {0} does not exist or could not be resolved.
    TargetNotFound(usize),

    /// The transaction at register {address:#06x} did not complete within {timeout:?}.
    TransactionTimeout {
        /// Register address of the transaction that timed out.
        address: u16,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Host address '{0}' is not a valid IPv4 address.
    InvalidHostAddress(String),

    /// Invalid configuration: {0}
    InvalidConfig(String),

    /// An I/O error occurred.
    Io(#[from] std::io::Error),

    /// A socket operation failed.
    Nix(#[from] nix::Error),
}
