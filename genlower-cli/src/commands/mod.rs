pub mod common;
pub mod lower;
pub mod passes;
pub mod print;
