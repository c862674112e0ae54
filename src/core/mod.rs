//! Core build logic: types, parsing, environment and link resolution,
//! assembly, linking, planning and execution.

pub mod assembler;
pub mod descriptor;
pub mod environment;
pub mod error;
pub mod executor;
pub mod linker;
pub mod parser;
pub mod planner;
pub mod project;
pub mod resolver;
pub mod state;
pub mod types;
