pub mod fs;
pub mod rules;
pub mod storage;
pub mod transfer;
pub mod utils;
