//! 동기화 핸들러 모듈

pub mod connection;
pub mod debounce;
pub mod history;
pub mod presence;
pub mod room;
pub mod typing;

pub use connection::*;
pub use debounce::*;
pub use history::*;
pub use presence::*;
pub use room::*;
pub use typing::*;
