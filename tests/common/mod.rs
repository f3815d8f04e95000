#![allow(dead_code)]

pub mod fixtures;
pub mod processors;

pub use fixtures::*;
pub use processors::*;
