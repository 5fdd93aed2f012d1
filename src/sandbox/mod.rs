//! Sandbox module containing all execution-related components.
//!
//! A request flows through these stages in order: [`request`] validation,
//! [`analysis`], the [`policy`] check, dependency [`resolver`], [`wrapper`]
//! generation, the process [`runner`] and the result [`decoder`].

pub mod analysis;
pub mod artifacts;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod executor;
pub mod io;
pub mod language;
pub mod limits;
pub mod outcome;
pub mod policy;
pub mod request;
pub mod resolver;
pub mod runner;
pub mod wrapper;
