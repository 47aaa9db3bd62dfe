use thiserror::Error;

/// Canonical result for the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("graph is not acyclic")]
    NotADag,

    #[error("cannot order phases so that every non-evacuatable memory-share dependency is adjacent")]
    CannotSatisfyAllGreenEdges,

    #[error("pipeline phase has no initiator node")]
    NoInitiatorNode,

    #[error("no nodes in pipelining graph")]
    EmptyPipeline,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Raised by stream-backed nodes when a read is requested past the known
    // end. The runtime only propagates it.
    #[error("stream request past known end")]
    EndOfStream,

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}
