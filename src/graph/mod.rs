//! The node-graph runtime: arena data model, pull-based scheduling, schema
//! registry and JSON serialization.

pub mod graph;
pub mod input;
pub mod node;
pub mod operation;
pub mod output;
pub mod picker;
pub mod schema;

pub use graph::{GraphError, NodeGraph};
pub use input::{InputBound, InputFlags, InputSlot, InputSource, IterationPolicy, SharedBuffer};
pub use node::{Node, NodeId, NodeKind, INVALID_NODE};
pub use operation::{InputDef, OpLayout, Operation, OutputDef};
pub use output::OutputSlot;
pub use picker::TreeMenuNode;
pub use schema::NodeGraphSchema;
