pub mod position_entity;
