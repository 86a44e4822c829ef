//! Driving adapters: how the outside world reaches the scheduler

pub mod rest;
