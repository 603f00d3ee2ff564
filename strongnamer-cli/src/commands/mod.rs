pub mod clean;
pub mod info;
pub mod sign;
pub mod token;
