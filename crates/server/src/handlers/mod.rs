//! HTTP request handlers.

pub mod bzz;
pub mod common;
pub mod feeds;
pub mod health;
pub mod pins;
pub mod stamps;
pub mod tags;

pub use bzz::*;
pub use common::*;
pub use feeds::*;
pub use health::*;
pub use pins::*;
pub use stamps::*;
pub use tags::*;
