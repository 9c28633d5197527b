pub mod direct_post_jwt;
pub mod presentation;
pub mod problem;
pub mod profile;
pub mod seed;
pub mod telemetry;
pub mod trace;
pub mod trust;
