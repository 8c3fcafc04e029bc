pub mod identifiers;
pub mod shape;
