#![allow(dead_code)]

pub mod broker;
pub mod names;
pub mod util;
