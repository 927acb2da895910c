pub mod admin;
pub mod auth;
pub mod cart;
pub mod guest;
pub mod medications;
pub mod orders;
pub mod prescriptions;
