pub mod api;
pub mod bridge;
pub mod chips;
pub mod hydrabus;
pub mod image;
pub mod isp;
pub mod operation;
pub mod targets;
pub mod terminal;
pub mod traffic;
pub mod transport;

#[cfg(test)]
mod sim;
