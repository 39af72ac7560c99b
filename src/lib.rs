pub mod logging;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod terminal;
pub mod transport;
