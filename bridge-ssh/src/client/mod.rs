pub mod handler;

pub use handler::{ClientHandler, ClientHandlerEvent};
