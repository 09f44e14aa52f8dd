// SPDX-License-Identifier: MIT

//! Agent development kit - collaborator seams used by graph nodes

pub mod error;
pub mod memory;
pub mod model;
pub mod tool;
