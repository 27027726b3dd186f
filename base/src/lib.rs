pub mod defs;
pub mod util;
