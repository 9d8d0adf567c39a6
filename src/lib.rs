pub mod arith;
pub mod config;
pub mod map;
pub mod percpu;
pub mod pmap;
pub mod report;
pub mod stat;
pub mod workload;
