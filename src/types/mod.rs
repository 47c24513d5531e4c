// Tidymarks shared type definitions
// Each submodule defines types used across the engine.

pub mod errors;
pub mod host;
pub mod node;
pub mod operation;
pub mod search;
pub mod settings;
