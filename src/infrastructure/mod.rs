pub mod db;
pub mod staging;
pub mod storage;
