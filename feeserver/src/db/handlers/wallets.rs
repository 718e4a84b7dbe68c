use crate::db::{errors::Result, models::wallets::UserWallet};
use sqlx::PgConnection;

pub struct Wallets<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Wallets<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Load the wallet for a user, if one has been provisioned
    pub async fn get_by_user_id(&mut self, user_id: i64) -> Result<Option<UserWallet>> {
        let wallet = sqlx::query_as::<_, UserWallet>(
            r#"
            SELECT id, user_id, balance, updated_at
            FROM user_wallet
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(wallet)
    }

    /// Conditionally set a wallet's balance.
    ///
    /// The update only applies while the row still holds `expected_balance`, so a concurrent debit
    /// between the read and this write leaves zero rows affected. Returns the number of rows updated.
    pub async fn update_balance(&mut self, wallet_id: i64, expected_balance: i64, new_balance: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE user_wallet
            SET balance = $1, updated_at = NOW()
            WHERE id = $2 AND balance = $3
            "#,
        )
        .bind(new_balance)
        .bind(wallet_id)
        .bind(expected_balance)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Provision a wallet with an opening balance
    pub async fn create(&mut self, user_id: i64, balance: i64) -> Result<UserWallet> {
        let wallet = sqlx::query_as::<_, UserWallet>(
            r#"
            INSERT INTO user_wallet (user_id, balance)
            VALUES ($1, $2)
            RETURNING id, user_id, balance, updated_at
            "#,
        )
        .bind(user_id)
        .bind(balance)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(wallet)
    }
}
