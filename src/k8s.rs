//! Kubernetes-backed cluster access.

pub mod client;

pub use client::KubeClusterApi;
