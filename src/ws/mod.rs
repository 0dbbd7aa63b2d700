//! Game socket transport

pub mod handler;
pub mod protocol;
