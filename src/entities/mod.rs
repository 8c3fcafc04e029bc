pub mod experiment;
pub mod listing;
pub mod variable;
