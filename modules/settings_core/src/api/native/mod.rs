//! In-process adapter

pub mod client;

pub use client::NativeClient;
