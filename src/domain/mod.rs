//! Domain layer: refund aggregates, status pipelines, order read models and
//! the ports the application layer drives.

pub mod money;
pub mod order;
pub mod ports;
pub mod refund;
pub mod status;
