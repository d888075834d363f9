mod client;
mod frame;
mod state;

pub use client::RemoteSyncClient;
pub use frame::{DeletedRef, SyncPullResponse, WireFrame};
pub use state::SyncState;
