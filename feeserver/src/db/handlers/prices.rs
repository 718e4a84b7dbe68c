use crate::db::{
    errors::Result,
    models::prices::{ModelInfo, PriceInfo},
};
use sqlx::PgConnection;

pub struct ModelPrices<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ModelPrices<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Find the catalog row for a billing model id
    pub async fn get_by_model_id(&mut self, model_id: &str) -> Result<Option<ModelInfo>> {
        let info = sqlx::query_as::<_, ModelInfo>(
            r#"
            SELECT id, model_id, node_id, name, input_price, output_price, cache_price, status
            FROM models_info
            WHERE model_id = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(model_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(info)
    }

    /// Token prices for a billing model id
    pub async fn get_price(&mut self, model_id: &str) -> Result<Option<PriceInfo>> {
        Ok(self.get_by_model_id(model_id).await?.as_ref().map(PriceInfo::from))
    }

    /// Insert a catalog row, returning its id
    pub async fn create(&mut self, model_id: &str, name: &str, price: PriceInfo) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO models_info (model_id, name, input_price, output_price, cache_price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(model_id)
        .bind(name)
        .bind(price.input_price)
        .bind(price.output_price)
        .bind(price.cache_price)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(id)
    }
}
