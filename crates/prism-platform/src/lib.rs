// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Platform shim: one import path for the windowing layer.
pub use winit;
