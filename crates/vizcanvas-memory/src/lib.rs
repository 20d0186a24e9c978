pub mod canvas;
pub mod chat;

pub use canvas::{CanvasSnapshot, CanvasStore};
pub use chat::{ChatEntry, ChatReader, ChatWriter};
