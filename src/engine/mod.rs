pub mod debounce;
pub mod filter;
pub mod preload;
pub mod session;
pub mod suggest;
pub mod window;
