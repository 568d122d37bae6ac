/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]
#![allow(clippy::type_complexity)]

pub mod bitvector;
pub mod control;
pub mod error;
pub mod filter;
pub mod frontend;
pub mod graph;
pub mod sampler;
pub mod topology;
pub mod wire;

pub mod prelude {
    pub use crate::bitvector::*;
    pub use crate::control::*;
    pub use crate::error::*;
    pub use crate::filter::*;
    pub use crate::frontend::*;
    pub use crate::graph::*;
    pub use crate::sampler::*;
    pub use crate::topology::*;
}
