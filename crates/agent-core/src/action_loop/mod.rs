//! Component G: the per-iteration Action Loop (§4.G).

pub mod controller;
pub mod prompt;

pub use controller::{run_iteration, web_search_tool, IterationOutcome, LoopState};
