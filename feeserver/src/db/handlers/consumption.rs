use crate::db::{
    errors::Result,
    models::consumption::{
        ConsumptionCreateDBRequest, ConsumptionDetail, ConsumptionRecord, ImageDetailCreateDBRequest,
        VideoDetailCreateDBRequest,
    },
};
use sqlx::PgConnection;

const RECORD_COLUMNS: &str = "id, user_id, node_id, caller, model, model_id, actual_provider, actual_provider_id, \
     consume_type, discount_amount, total_consumed, input_tokens, output_tokens, cache_tokens, \
     input_price, output_price, cache_price, created_at";

pub struct Consumptions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Consumptions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Append a consumption row. Rows are never updated afterwards.
    pub async fn create(&mut self, request: &ConsumptionCreateDBRequest) -> Result<ConsumptionRecord> {
        let query = format!(
            r#"
            INSERT INTO user_consume (
                user_id, node_id, caller, model, model_id, actual_provider, actual_provider_id,
                consume_type, total_consumed, input_tokens, output_tokens, cache_tokens,
                input_price, output_price, cache_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, ConsumptionRecord>(&query)
            .bind(request.user_id)
            .bind(&request.node_id)
            .bind(&request.caller)
            .bind(&request.model)
            .bind(&request.model_id)
            .bind(&request.actual_provider)
            .bind(&request.actual_provider_id)
            .bind(request.consume_type)
            .bind(request.total_consumed)
            .bind(request.input_tokens)
            .bind(request.output_tokens)
            .bind(request.cache_tokens)
            .bind(request.input_price)
            .bind(request.output_price)
            .bind(request.cache_price)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(record)
    }

    /// Attach an image or video detail row to a consumption row
    pub async fn create_detail(&mut self, consume_id: i64, detail: &ConsumptionDetail) -> Result<()> {
        match detail {
            ConsumptionDetail::Image(image) => self.create_image_detail(consume_id, image).await,
            ConsumptionDetail::Video(video) => self.create_video_detail(consume_id, video).await,
        }
    }

    async fn create_image_detail(&mut self, consume_id: i64, detail: &ImageDetailCreateDBRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_consume_detail_image (consume_id, quality, size, count, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(consume_id)
        .bind(&detail.quality)
        .bind(&detail.size)
        .bind(detail.count)
        .bind(detail.unit_price)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    async fn create_video_detail(&mut self, consume_id: i64, detail: &VideoDetailCreateDBRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_consume_detail_video (consume_id, seconds, size, unit_price)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(consume_id)
        .bind(detail.seconds)
        .bind(&detail.size)
        .bind(detail.unit_price)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
impl Consumptions<'_> {
    /// List a user's consumption rows, oldest first
    pub async fn list_by_user(&mut self, user_id: i64) -> Result<Vec<ConsumptionRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM user_consume WHERE user_id = $1 ORDER BY id");
        let records = sqlx::query_as::<_, ConsumptionRecord>(&query)
            .bind(user_id)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(records)
    }

    /// Count rows of a given kind, across all users
    pub async fn count_by_type(&mut self, consume_type: crate::db::models::consumption::ConsumeType) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_consume WHERE consume_type = $1")
            .bind(consume_type)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::consumption::ConsumeType;
    use sqlx::PgPool;

    fn text_request(user_id: i64, total: i64) -> ConsumptionCreateDBRequest {
        ConsumptionCreateDBRequest {
            user_id,
            node_id: "node-1".into(),
            caller: user_id.to_string(),
            model: "gpt-4o".into(),
            model_id: "m-1".into(),
            actual_provider: "openai".into(),
            actual_provider_id: "p-1".into(),
            consume_type: ConsumeType::Text,
            total_consumed: total,
            input_tokens: 1000,
            output_tokens: 10,
            cache_tokens: 0,
            input_price: 20,
            output_price: 60,
            cache_price: 0,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_and_list(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Consumptions::new(&mut conn);

        let first = repo.create(&text_request(5, 40_000)).await.unwrap();
        let second = repo.create(&text_request(5, 1)).await.unwrap();
        repo.create(&text_request(6, 2)).await.unwrap();

        assert_eq!(first.discount_amount, 0);
        assert_eq!(first.consume_type, ConsumeType::Text);
        assert_eq!(first.total_consumed, 40_000);

        let listed = repo.list_by_user(5).await.unwrap();
        assert_eq!(listed, vec![first, second]);
        assert_eq!(repo.count_by_type(ConsumeType::Text).await.unwrap(), 3);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_details(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Consumptions::new(&mut conn);

        let mut request = text_request(9, 33_000);
        request.consume_type = ConsumeType::Image;
        let record = repo.create(&request).await.unwrap();

        let detail = ConsumptionDetail::Image(ImageDetailCreateDBRequest {
            quality: "low".into(),
            size: "1024x1024".into(),
            count: 3,
            unit_price: 0.011,
        });
        repo.create_detail(record.id, &detail).await.unwrap();

        let video = ConsumptionDetail::Video(VideoDetailCreateDBRequest {
            seconds: 12.5,
            size: "1024x1792".into(),
            unit_price: 0.5,
        });
        repo.create_detail(record.id, &video).await.unwrap();

        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_consume_detail_image WHERE consume_id = $1")
            .bind(record.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(images, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_long_wire_strings_are_stored(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Consumptions::new(&mut conn);

        let mut request = text_request(11, 1);
        request.node_id = "n".repeat(300);
        request.actual_provider = "p".repeat(300);
        let record = repo.create(&request).await.unwrap();
        assert_eq!(record.node_id.len(), 300);

        let detail = ConsumptionDetail::Image(ImageDetailCreateDBRequest {
            quality: "q".repeat(200),
            size: "1024x1024".into(),
            count: i64::from(u32::MAX),
            unit_price: 0.011,
        });
        repo.create_detail(record.id, &detail).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT count FROM user_consume_detail_image WHERE consume_id = $1")
            .bind(record.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, i64::from(u32::MAX));
    }
}
