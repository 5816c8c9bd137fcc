pub mod model;
pub mod okx;
pub mod risk;
pub mod services;
