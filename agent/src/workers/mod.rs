//! Background workers

pub mod converger;
