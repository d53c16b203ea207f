//! # Energy Meter Library
//!
//! Household energy metering on top of two MCP342x-style delta-sigma
//! converters.
//!
//! This library provides the converter driver, calibrated channel models,
//! the daily energy statistics engine, and the acquisition loop that ties
//! them together, plus message publishing and display rendering on top of
//! the statistics.

pub mod acquisition;
pub mod adc;
pub mod channel;
pub mod config;
pub mod display;
pub mod error;
pub mod publish;
pub mod stats;
