pub mod api;
pub mod companion;
pub mod ice;
pub mod pagination;
pub mod room;
pub mod session;

pub use api::*;
pub use companion::*;
pub use ice::*;
pub use pagination::*;
pub use room::*;
pub use session::*;
