pub mod cache;
pub mod catalog;
pub mod images;
pub mod provider;
pub mod storage;
pub mod wishlist;
