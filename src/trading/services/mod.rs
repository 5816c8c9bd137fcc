pub mod guard_service;

pub use guard_service::GuardService;
