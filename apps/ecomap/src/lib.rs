pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod placement;
pub mod render;
pub mod report;
pub mod session;
pub mod submission;
pub mod supabase;

#[cfg(test)]
pub(crate) mod test_support;
