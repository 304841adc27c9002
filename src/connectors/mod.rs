pub mod futures_hub;
pub mod kucoin;
pub mod messages;
pub mod signer;
pub mod traits;
