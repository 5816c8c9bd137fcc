pub mod strategy_config;
