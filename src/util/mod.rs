// SPDX-License-Identifier: Unlicense

//! Miscellaneous support functions.

pub mod backoff;
pub mod locked;
pub mod result;
