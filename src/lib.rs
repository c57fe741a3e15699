//! Library crate for tap-rounds-back: timed tap rounds, their score ledger and the HTTP surface.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
