//! Deployed image references

pub mod reference;

pub use reference::{ImageReference, ReferenceError};
