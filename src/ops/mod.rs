//! The operator catalogue, grouped the way the schema registers node types.
//!
//! # Groups
//! - `Node Graph.Source` — [`source`]
//! - `Node Graph.Output` — [`output`]
//! - `Node Graph.Cache` / `Data IO` — [`data_io`]
//! - `Math.*` — [`arithmetic`], [`logic`], [`numerical`]
//! - `Signal.*` — [`generator`], [`control`], [`filter`], [`effect`]
//! - `Trading.*` — [`trading`]
//! - `Device IO.*` — [`device`], [`output`]
//! - `UI` — [`ui`]

pub mod arithmetic;
pub mod control;
pub mod data_io;
pub mod device;
pub mod effect;
pub mod filter;
pub mod generator;
pub mod logic;
pub mod numerical;
pub mod output;
pub mod source;
pub mod trading;
pub mod ui;
