//! UK pension annual allowance calculator.
//!
//! `core` derives each tax year's tapered allowance and allocates
//! over-contributions against up to three earlier years' unused allowance.
//! `api` and `config` wrap it in a stateless JSON service.

pub mod api;
pub mod config;
pub mod core;
