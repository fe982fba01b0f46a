mod controller;
mod entry;
pub(crate) use controller::*;
pub use entry::ResourceSnapshot;
pub(crate) use entry::*;

#[cfg(test)]
mod controller_test;
