// dossier-hub library
// Tenant-aware session spawning on top of a Kubernetes cluster

// Cluster access
pub mod cluster;
pub mod directory;

// Configuration and errors
pub mod config;
pub mod error;

// Identity and access
pub mod authenticator;
pub mod identity;

// Tenant and backend negotiation
pub mod resolution;
pub mod spawners;
pub mod tenancy;

// Workloads
pub mod backend;
pub mod namespace;

// Session lifecycle
pub mod controller;
pub mod session;

// Options form and pages
pub mod forms;
pub mod views;

// HTTP routes
pub mod http;
