//! Content scripts and stylesheets derived from policy.

mod injectables;

pub use injectables::{compute_injectables, Injectable, InjectableKind, InjectableRegistrar};
