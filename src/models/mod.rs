pub mod negotiation;
pub mod order;
pub mod party;
pub mod promo;
pub mod route;
pub mod wallet;
