pub mod client;
pub mod reconciler;

pub use client::{AccrualClient, Resolution};
pub use reconciler::Reconciler;
