pub mod diagnostics;
pub mod message;
pub mod model;
pub mod presentation;
pub mod protocol;
pub mod providers;
pub mod session;
pub mod smoothing;
pub mod tools;
