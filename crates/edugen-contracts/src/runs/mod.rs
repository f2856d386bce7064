pub mod receipts;
pub mod session;
