pub mod entity;
pub mod position;
pub mod strategy;
