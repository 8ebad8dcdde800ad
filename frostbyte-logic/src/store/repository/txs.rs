use frostbyte_entity::txs::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    sea_query::Expr, ActiveValue::{NotSet, Set}, ColumnTrait, ConnectionTrait, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

/// Inserts one tx row and returns the store-assigned `tx_num`.
pub async fn insert(
    db: &impl ConnectionTrait,
    hash_prefix: Vec<u8>,
    block_number: i64,
    payload: Vec<u8>,
    traces: Option<Vec<u8>>,
) -> Result<i64, DbErr> {
    let result = Entity::insert(ActiveModel {
        tx_num: NotSet,
        hash_prefix: Set(hash_prefix),
        block_number: Set(block_number),
        payload: Set(payload),
        traces: Set(traces),
    })
    .exec(db)
    .await?;
    Ok(result.last_insert_id)
}

/// The primary streaming read: rows with `tx_num > greater_than`, ascending.
pub async fn stream_after(
    db: &impl ConnectionTrait,
    greater_than: i64,
    limit: u64,
) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::TxNum.gt(greater_than))
        .order_by_asc(Column::TxNum)
        .limit(limit)
        .all(db)
        .await
}

pub async fn by_tx_nums(
    db: &impl ConnectionTrait,
    tx_nums: Vec<i64>,
) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::TxNum.is_in(tx_nums))
        .order_by_asc(Column::TxNum)
        .all(db)
        .await
}

/// All txs of one block in insertion order.
pub async fn by_block(db: &impl ConnectionTrait, block_number: i64) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::BlockNumber.eq(block_number))
        .order_by_asc(Column::TxNum)
        .all(db)
        .await
}

pub async fn find_by_hash_prefix(
    db: &impl ConnectionTrait,
    prefix: Vec<u8>,
) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::HashPrefix.eq(prefix))
        .all(db)
        .await
}

/// All txs with `from <= tx_num <= to`, ascending.
pub async fn range(db: &impl ConnectionTrait, from: i64, to: i64) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::TxNum.between(from, to))
        .order_by_asc(Column::TxNum)
        .all(db)
        .await
}

/// Rewrites payload bytes in place after dictionary re-compression. The
/// decoded value is unchanged by construction.
pub async fn update_compressed(
    db: &impl ConnectionTrait,
    tx_num: i64,
    payload: Vec<u8>,
    traces: Option<Vec<u8>>,
) -> Result<(), DbErr> {
    Entity::update_many()
        .col_expr(Column::Payload, Expr::value(payload))
        .col_expr(Column::Traces, Expr::value(traces))
        .filter(Column::TxNum.eq(tx_num))
        .exec(db)
        .await?;
    Ok(())
}
