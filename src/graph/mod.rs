//! Graph collaborators: nodes, edges, completion signals and execution contexts

mod completion;
mod context;
mod edge;
mod error;
mod node;

#[cfg(test)]
mod tests;

pub use completion::{Completion, CompletionResult};
pub use context::ExecutionContext;
pub use edge::{Edge, Link};
pub use error::{GraphError, GraphResult};
pub use node::{LinkHooks, Node, NodeId, NodeState, StateChange};
