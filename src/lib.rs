//! Translation of JVM method bytecode into a typed, register-based IR.
//!
//! A [`method::MethodBody`] holds a label-addressed, stack-based instruction
//! stream. [`RawInstListBuilder`] turns it into an [`ir::InstList`] where every
//! operand-stack slot and local variable is an explicit register, joins carry
//! explicit assignments and gotos, and handlers start with a catch.

pub mod assembler;
mod builder;
mod cfg;
pub mod descriptor;
pub mod error;
pub mod finalize;
mod frame;
pub mod ir;
mod merge;
pub mod method;
pub mod opcodes;
mod order;
mod refine;
pub mod types;

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use crate::builder::RawInstListBuilder;
pub use crate::error::BuildError;
pub use crate::finalize::{Canonicalizer, Identity};
pub use crate::ir::InstList;
pub use crate::method::MethodBody;

/// Builder configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Name registers after the debug table where an entry applies, instead
    /// of `%N`.
    pub keep_local_variable_names: bool,
}

pub fn build_method(body: &MethodBody, options: BuildOptions) -> Result<InstList> {
    RawInstListBuilder::new(body, options).build()
}

/// Build every body in parallel. Results keep the input order and a failing
/// method does not affect the others.
pub fn build_methods(bodies: &[MethodBody], options: BuildOptions) -> Vec<Result<InstList>> {
    build_methods_with(bodies, options, &Identity)
}

pub fn build_methods_with(
    bodies: &[MethodBody],
    options: BuildOptions,
    canonicalizer: &dyn Canonicalizer,
) -> Vec<Result<InstList>> {
    bodies
        .par_iter()
        .map(|body| RawInstListBuilder::new(body, options).build_with(canonicalizer))
        .collect()
}
