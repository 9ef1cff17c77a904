//! # Phasor - realtime node-graph signal engine
//!
//! Phasor is a modular signal-processing runtime built around three
//! cooperating subsystems:
//!
//! - **Node graph** ([`graph`], [`ops`]): a DAG of operators producing and
//!   consuming buffered multi-channel f32 streams. Processing is pull-based
//!   and depth-first from the output nodes, with a per-node process flag so
//!   every operator runs at most once per pass. A tick phase drives
//!   time-dependent operator behavior independently of sample pull. Graphs
//!   serialize to a stable JSON schema and register their node types in a
//!   picker tree.
//! - **Executor** ([`executor`]): a bounded multi-threaded job scheduler
//!   with per-job retry, back-off, pause and cooperative shutdown, used to
//!   drive network-style background fetches.
//! - **Sequential block cache** ([`store`]): a position-indexed cache of
//!   fixed-width serialized blocks behind a pluggable persistence provider,
//!   used to stage historical time-series data into the graph.
//!
//! Device I/O lives at the edges: [`audio`] defines the stream-sink contract
//! (with a cpal implementation) and [`hid`] maps keyboard and MIDI input
//! onto polyphonic note channels.
//!
//! ## Quick start
//!
//! ```
//! use phasor::graph::NodeGraphSchema;
//!
//! let mut schema = NodeGraphSchema::with_all_node_types("My Patch", "demo");
//!
//! // (1.8 + 2.3) feeding a debug probe.
//! let add = schema.new_node(100, -1);
//! let probe = schema.new_node(20, -1);
//! schema.set_input_value(add, 0, 1.8, 1).unwrap();
//! schema.set_input_value(add, 1, 2.3, 1).unwrap();
//! schema.set_input_link(probe, 0, add, 0).unwrap();
//!
//! schema.tick(1, 0.016);
//! schema.process_subgraph(64, 64);
//! ```

pub mod audio;
pub mod executor;
pub mod graph;
pub mod hid;
pub mod ops;
pub mod store;
pub mod util;

pub use executor::{ExecutorService, RunResult, RunState, Runnable};
pub use graph::{GraphError, NodeGraph, NodeGraphSchema, NodeId, NodeKind};
pub use store::{CacheProvider, FileCacheProvider, SequentialCache, SequentialCacheStore};
