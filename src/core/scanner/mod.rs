// src/core/scanner/mod.rs

// One module per external collaborator. The orchestration that strings them
// together lives in `core::pipeline`.
pub mod port_scanner;
pub mod service_scanner;
pub mod subdomain_enum;
