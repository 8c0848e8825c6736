//! Core types for Meridian

pub mod ids;
pub mod lender;
pub mod loan;
pub mod market;
pub mod request;
