use frostbyte_entity::tx_topics::{ActiveModel, Column, Entity};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};

pub async fn insert_many(
    db: &impl ConnectionTrait,
    rows: Vec<(Vec<u8>, i64)>,
) -> Result<(), DbErr> {
    if rows.is_empty() {
        return Ok(());
    }
    let models = rows.into_iter().map(|(topic_prefix, tx_num)| ActiveModel {
        topic_prefix: Set(topic_prefix),
        tx_num: Set(tx_num),
    });
    Entity::insert_many(models).exec(db).await?;
    Ok(())
}

/// Distinct `tx_num`s greater than the cursor that carry any of the given
/// topic prefixes, ascending, capped at `limit`.
pub async fn tx_nums_for_prefixes(
    db: &impl ConnectionTrait,
    prefixes: Vec<Vec<u8>>,
    greater_than: i64,
    limit: u64,
) -> Result<Vec<i64>, DbErr> {
    Entity::find()
        .select_only()
        .column(Column::TxNum)
        .distinct()
        .filter(Column::TopicPrefix.is_in(prefixes))
        .filter(Column::TxNum.gt(greater_than))
        .order_by_asc(Column::TxNum)
        .limit(limit)
        .into_tuple::<i64>()
        .all(db)
        .await
}
