// src/execution/mod.rs
pub mod position;
pub mod protocol;
pub mod supervisor;
pub mod terminal;

pub use position::PositionLedger;
pub use terminal::{TerminalBridge, TerminalHandle, TerminalRegistry};
