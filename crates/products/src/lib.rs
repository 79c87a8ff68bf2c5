//! Products (read-only catalog input to the pool engine).
//!
//! The engine never writes product attributes; it only reads them through the
//! typed accessors on [`Product`].

pub mod product;

pub use product::{ChangedProducts, Product};
