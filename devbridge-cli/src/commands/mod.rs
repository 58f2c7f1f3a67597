pub mod bulk;
pub mod daemon;
pub mod diff;
pub mod forget;
pub mod init;
pub mod output;
pub mod resolve;
pub mod session;
pub mod status;
pub mod sync;
pub mod verify;
