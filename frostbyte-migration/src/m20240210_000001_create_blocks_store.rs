use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE "blocks" (
                "number" BIGINT PRIMARY KEY,
                "hash_prefix" BLOB NOT NULL,
                "payload" BLOB NOT NULL
            );

            CREATE INDEX "idx_blocks_hash_prefix" ON "blocks" ("hash_prefix");

            CREATE TABLE "txs" (
                "tx_num" INTEGER PRIMARY KEY AUTOINCREMENT,
                "hash_prefix" BLOB NOT NULL,
                "block_number" BIGINT NOT NULL,
                "payload" BLOB NOT NULL,
                "traces" BLOB
            );

            CREATE INDEX "idx_txs_hash_prefix" ON "txs" ("hash_prefix");

            CREATE INDEX "idx_txs_block_number" ON "txs" ("block_number");

            CREATE TABLE "tx_topics" (
                "topic_prefix" BLOB NOT NULL,
                "tx_num" BIGINT NOT NULL,
                PRIMARY KEY ("topic_prefix", "tx_num")
            );

            CREATE TABLE "catalog_int" (
                "name" TEXT PRIMARY KEY,
                "value" BIGINT NOT NULL
            );

            CREATE TABLE "catalog_blob" (
                "name" TEXT PRIMARY KEY,
                "value" BLOB NOT NULL
            );

            CREATE TABLE "tx_dictionaries" (
                "batch_num" BIGINT NOT NULL,
                "kind" TEXT NOT NULL,
                "dictionary" BLOB NOT NULL,
                PRIMARY KEY ("batch_num", "kind")
            );

            CREATE TABLE "block_dictionaries" (
                "batch_num" BIGINT PRIMARY KEY,
                "dictionary" BLOB NOT NULL
            );
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "block_dictionaries";
            DROP TABLE "tx_dictionaries";
            DROP TABLE "catalog_blob";
            DROP TABLE "catalog_int";
            DROP TABLE "tx_topics";
            DROP TABLE "txs";
            DROP TABLE "blocks";
        "#;
        crate::from_sql(manager, sql).await
    }
}
