use thiserror::Error;

/// Status codes returned by bus operations.
///
/// None of these is fatal to the caller. `NoResources` is only surfaced by the
/// queue itself; `send` counts and swallows it so interrupt-context producers
/// never have to handle a full queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("Invalid parameter")]
    InvalidParameter,

    #[error("Operation not supported (listener already registered)")]
    NotSupported,

    #[error("No resources available (event queue full)")]
    NoResources,
}
