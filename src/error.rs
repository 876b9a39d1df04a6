use crate::dom::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("render failed for #{element}: {source}")]
    Render {
        element: String,
        #[source]
        source: EngineError,
    },

    #[error("engine output is not a usable SVG surface: {0}")]
    Surface(String),

    #[error("diagram container has no id attribute")]
    MissingContainerId,

    #[error("diagram container #{0} has no data-graph attribute")]
    MissingDescription(String),

    #[error("tooltip element has no id attribute")]
    MissingTooltipId,

    #[error("unknown hook `{0}`")]
    UnknownHook(String),

    #[error("no hook is mounted on {0:?}")]
    NotMounted(NodeId),

    #[error("node {0:?} is not attached to the document")]
    DetachedNode(NodeId),

    #[error("cannot insert {child:?} below its own descendant {parent:?}")]
    InvalidHierarchy { parent: NodeId, child: NodeId },

    #[error("the document backing this component has been dropped")]
    DocumentDropped,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failures reported by a rendering engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Rejected(String),

    #[error("description is {len} bytes, above the {max} byte limit")]
    TextTooLarge { len: usize, max: usize },

    #[error("failed to run `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("render was dropped before it completed")]
    Canceled,
}
