mod composer;
mod model;

pub use composer::{ComposeError, PostComposer};
pub use model::Post;
