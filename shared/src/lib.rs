pub mod errors;
pub mod interaction;
pub mod log;
pub mod store;
pub mod types;
pub mod utils;
