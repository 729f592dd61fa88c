pub mod address;
pub mod amount;
pub mod creator;
pub mod wallet;

pub use address::Address;
pub use amount::{AmountError, TokenAmount};
pub use creator::{CreatorProfile, CreatorProfileRequest, CreatorRecord, TipEvent};
pub use wallet::WalletIdentity;
