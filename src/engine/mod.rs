pub mod dispatch;
pub mod ledger;
pub mod negotiation;
pub mod orders;
pub mod parties;
pub mod pricing;
pub mod route;
pub mod wallets;
