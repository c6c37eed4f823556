#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod args;
pub mod handlers;
