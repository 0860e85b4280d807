pub mod storage;
pub mod synthesis;
