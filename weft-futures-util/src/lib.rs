pub mod future;
pub mod stream;

pub mod prelude {
    pub use crate::stream::WeftStreamExt;
}
