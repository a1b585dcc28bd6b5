pub mod chips;
pub mod dump;
pub mod list;
pub mod probe;
