pub mod gate_compiler;
pub mod outage_service;
