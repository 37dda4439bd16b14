//! Snail core: symbol interning and the identifier cache shared by the
//! analyzer and the virtual machine.
#![warn(clippy::all)]

pub mod keywords;
pub mod strings;

pub use keywords::{Keyword, Keywords};
pub use strings::{IntStr, SharedStringTable, StringTable};
