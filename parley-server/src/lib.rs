pub mod http;
pub mod status;
pub mod subsystems;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
