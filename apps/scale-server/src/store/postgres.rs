use async_trait::async_trait;
use sqlx::PgPool;

use super::{
    MeasurementQuery, MeasurementReader, MeasurementRecord, MeasurementSink, RealtimeFilter,
};

const RECORD_COLUMNS: &str = r#"ts, device_ip, endpoint, name, value, raw_value, is_nan, "type""#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeasurementSink for PgStore {
    async fn append(&self, record: &MeasurementRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO measurements (ts, device_ip, endpoint, name, value, raw_value, is_nan, "type")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.ts)
        .bind(&record.device_ip)
        .bind(&record.endpoint)
        .bind(&record.name)
        .bind(record.value)
        .bind(record.raw_value)
        .bind(record.is_nan)
        .bind(&record.kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MeasurementReader for PgStore {
    async fn sensor_names(&self, endpoint: Option<&str>) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT name
            FROM measurements
            WHERE name <> ''
              AND ($1::text IS NULL OR endpoint = $1)
            ORDER BY name
            "#,
        )
        .bind(endpoint)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.0).collect())
    }

    async fn latest(&self, limit: i64) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM measurements ORDER BY ts DESC LIMIT $1");
        sqlx::query_as::<_, MeasurementRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
    }

    async fn measurements(
        &self,
        query: &MeasurementQuery,
    ) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM measurements
            WHERE name = $1
              AND ($2::timestamptz IS NULL OR ts >= $2)
              AND ($3::timestamptz IS NULL OR ts <= $3)
              AND ($4::text IS NULL OR endpoint = $4)
              AND ($5::text IS NULL OR device_ip = $5)
            ORDER BY ts DESC
            LIMIT $6
            "#
        );
        let mut rows = sqlx::query_as::<_, MeasurementRecord>(&sql)
            .bind(&query.name)
            .bind(query.start)
            .bind(query.end)
            .bind(query.endpoint.as_deref())
            .bind(query.device_ip.as_deref())
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn latest_per_sensor(
        &self,
        filter: &RealtimeFilter,
    ) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
        let names = if filter.names.is_empty() {
            None
        } else {
            Some(filter.names.clone())
        };
        let sql = format!(
            r#"
            SELECT DISTINCT ON (name) {RECORD_COLUMNS}
            FROM measurements
            WHERE name <> ''
              AND ($1::text[] IS NULL OR name = ANY($1))
              AND ($2::text IS NULL OR endpoint = $2)
              AND ($3::text IS NULL OR device_ip = $3)
            ORDER BY name, ts DESC
            "#
        );
        sqlx::query_as::<_, MeasurementRecord>(&sql)
            .bind(names)
            .bind(filter.endpoint.as_deref())
            .bind(filter.device_ip.as_deref())
            .fetch_all(&self.pool)
            .await
    }
}
