//! Kind-specific directive evaluators, one module per directive kind.

pub mod exe;
pub mod export;
pub mod guard;
pub mod output;
pub mod path;
pub mod run;
pub mod show;
pub mod var;
pub mod when;
