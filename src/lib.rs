//! Back up a web site's files and MySQL/MariaDB database over SSH, restore
//! them, or load them into a local Docker stack.

pub mod core;
pub mod utils;
