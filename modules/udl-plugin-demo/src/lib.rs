mod feed;
mod rest;

pub use feed::FeedPlugin;
pub use rest::RestPlugin;
