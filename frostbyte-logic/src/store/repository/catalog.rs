use frostbyte_entity::{catalog_blob, catalog_int};
use sea_orm::{
    sea_query::OnConflict, ActiveValue::Set, ConnectionTrait, DbErr, EntityTrait,
};

pub const EVM_CHAIN_ID: &str = "evm_chain_id";
pub const HAS_DEBUG: &str = "has_debug";
pub const LAST_STORED_BLOCK_NUMBER: &str = "last_stored_block_number";
pub const TX_COUNT: &str = "tx_count";
pub const BLOCKCHAIN_LATEST_BLOCK: &str = "blockchain_latest_block";
pub const IS_CAUGHT_UP: &str = "is_caught_up";
pub const LAST_COMPRESSED_BATCH_NUM: &str = "last_compressed_batch_num";
pub const LAST_COMPRESSED_BLOCK_BATCH_NUM: &str = "last_compressed_block_batch_num";
pub const PRECOMPILE_BLOCKCHAIN_ID: &str = "precompile_blockchain_id";

pub async fn get_int(db: &impl ConnectionTrait, name: &str) -> Result<Option<i64>, DbErr> {
    Ok(catalog_int::Entity::find_by_id(name.to_owned())
        .one(db)
        .await?
        .map(|row| row.value))
}

pub async fn set_int(db: &impl ConnectionTrait, name: &str, value: i64) -> Result<(), DbErr> {
    catalog_int::Entity::insert(catalog_int::ActiveModel {
        name: Set(name.to_owned()),
        value: Set(value),
    })
    .on_conflict(
        OnConflict::column(catalog_int::Column::Name)
            .update_column(catalog_int::Column::Value)
            .to_owned(),
    )
    .exec(db)
    .await?;
    Ok(())
}

pub async fn get_blob(db: &impl ConnectionTrait, name: &str) -> Result<Option<Vec<u8>>, DbErr> {
    Ok(catalog_blob::Entity::find_by_id(name.to_owned())
        .one(db)
        .await?
        .map(|row| row.value))
}

pub async fn set_blob(db: &impl ConnectionTrait, name: &str, value: Vec<u8>) -> Result<(), DbErr> {
    catalog_blob::Entity::insert(catalog_blob::ActiveModel {
        name: Set(name.to_owned()),
        value: Set(value),
    })
    .on_conflict(
        OnConflict::column(catalog_blob::Column::Name)
            .update_column(catalog_blob::Column::Value)
            .to_owned(),
    )
    .exec(db)
    .await?;
    Ok(())
}
