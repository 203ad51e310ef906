#![doc = include_str!("../README.md")]

pub mod access;
pub mod lowering;
pub mod properties;
pub mod store;
pub mod system;
