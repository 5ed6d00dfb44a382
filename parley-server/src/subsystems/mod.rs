pub mod accounts;
pub mod cleanup;
pub mod conversations;
pub mod dispatch;
pub mod reply;
pub mod retrieve;
pub mod session;
