//! Integration tests
//!
//! Multi-node scenarios over a shared in-process bus

mod client_result_test;
mod group_test;
