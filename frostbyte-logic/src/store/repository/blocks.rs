use frostbyte_entity::blocks::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    sea_query::Expr, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder,
};

pub async fn insert(
    db: &impl ConnectionTrait,
    number: i64,
    hash_prefix: Vec<u8>,
    payload: Vec<u8>,
) -> Result<(), DbErr> {
    Entity::insert(ActiveModel {
        number: Set(number),
        hash_prefix: Set(hash_prefix),
        payload: Set(payload),
    })
    .exec(db)
    .await?;
    Ok(())
}

pub async fn get(db: &impl ConnectionTrait, number: i64) -> Result<Option<Model>, DbErr> {
    Entity::find_by_id(number).one(db).await
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

/// All blocks with `from <= number <= to`, ascending.
pub async fn range(db: &impl ConnectionTrait, from: i64, to: i64) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::Number.between(from, to))
        .order_by_asc(Column::Number)
        .all(db)
        .await
}

pub async fn update_payload(
    db: &impl ConnectionTrait,
    number: i64,
    payload: Vec<u8>,
) -> Result<(), DbErr> {
    Entity::update_many()
        .col_expr(Column::Payload, Expr::value(payload))
        .filter(Column::Number.eq(number))
        .exec(db)
        .await?;
    Ok(())
}
