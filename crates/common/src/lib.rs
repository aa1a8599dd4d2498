// waypoint-common: shared types and utilities for the Waypoint workspace

pub mod geo;
pub mod protocol;
pub mod types;
