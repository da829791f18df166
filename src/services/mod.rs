// Pure pricing
pub mod pricing;

// Ledgers over the shared counters
pub mod inventory;
pub mod loyalty;

// Transaction lifecycle
pub mod checkout;
pub mod expiry;
pub mod settlement;
