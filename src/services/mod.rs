// Catalog and shopping
pub mod cart;
pub mod catalog;
pub mod uploads;

// Orders and fulfilment
pub mod delivery;
pub mod orders;

// Payments
pub mod gateway;
pub mod payments;

// Accounts
pub mod identity;

// Reporting and assistance
pub mod chat;
pub mod revenue;
