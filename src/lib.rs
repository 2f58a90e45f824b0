//! Dynamic command registry and execution engine.
//!
//! Annotated functions declared in a [`command::ModuleTree`] are scanned by
//! the [`registry::Registry`] into command descriptors. The
//! [`form`] module turns their parameters into input widgets, and the
//! [`dispatch`] module runs them in a worker thread, under the graphical
//! toolkit lock, or inside an [`session::InterpreterSession`], while the
//! [`bridge`] relays console output and prompts.

pub mod bridge;
pub mod builtin;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod execution;
pub mod form;
pub mod inspect;
pub mod printer;
pub mod registry;
pub mod session;
