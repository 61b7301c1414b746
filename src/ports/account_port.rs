//! Account and profile persistence port trait.

use rust_decimal::Decimal;

use crate::domain::account::{Account, NewAccount, Profile};
use crate::domain::error::WalletError;

pub trait AccountPort {
    /// Creates the account and its profile in one transaction.
    ///
    /// Fails with `DuplicateUsername` or `DuplicateEmail` when taken.
    fn create_account(
        &self,
        account: &NewAccount,
        starting_balance: Decimal,
    ) -> Result<Account, WalletError>;

    fn find_account(&self, user_id: i64) -> Result<Option<Account>, WalletError>;

    fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, WalletError>;

    /// Looks up by the stored (lowercased) address.
    fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, WalletError>;

    fn get_profile(&self, user_id: i64) -> Result<Profile, WalletError>;

    fn list_accounts(&self) -> Result<Vec<(Account, Profile)>, WalletError>;
}
