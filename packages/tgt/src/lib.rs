#![no_std]

pub mod math;
pub mod ttl;
pub mod utils;
