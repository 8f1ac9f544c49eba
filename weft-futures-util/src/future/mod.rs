mod trigger;

pub use trigger::{Fired, Trigger};
