pub mod assemble;
pub mod generate;
pub mod util;
pub mod validate;
