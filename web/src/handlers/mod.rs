//! HTTP request handlers.

pub mod health;
pub mod inventory;

pub use health::{health_check, readiness_check};
pub use inventory::{
    campaign_stats, initialize_inventory, purchase_numbers, release_numbers, reserve_numbers,
    select_numbers,
};
