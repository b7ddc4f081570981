pub mod checkout;
pub mod loyalty;
pub mod orders;
pub mod products;
pub mod reconciliation;
