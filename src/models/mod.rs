pub mod pool_config;
