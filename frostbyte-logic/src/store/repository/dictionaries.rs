use frostbyte_entity::{block_dictionaries, tx_dictionaries};
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr, EntityTrait};

/// Two dictionary tracks exist for txs: one trained over `{tx, receipt}`
/// payloads, one over trace payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxDictKind {
    Data,
    Traces,
}

impl TxDictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxDictKind::Data => "data",
            TxDictKind::Traces => "traces",
        }
    }
}

pub async fn insert_tx_dict(
    db: &impl ConnectionTrait,
    batch_num: i64,
    kind: TxDictKind,
    dictionary: Vec<u8>,
) -> Result<(), DbErr> {
    tx_dictionaries::Entity::insert(tx_dictionaries::ActiveModel {
        batch_num: Set(batch_num),
        kind: Set(kind.as_str().to_owned()),
        dictionary: Set(dictionary),
    })
    .exec(db)
    .await?;
    Ok(())
}

pub async fn get_tx_dict(
    db: &impl ConnectionTrait,
    batch_num: i64,
    kind: TxDictKind,
) -> Result<Option<Vec<u8>>, DbErr> {
    Ok(
        tx_dictionaries::Entity::find_by_id((batch_num, kind.as_str().to_owned()))
            .one(db)
            .await?
            .map(|row| row.dictionary),
    )
}

pub async fn insert_block_dict(
    db: &impl ConnectionTrait,
    batch_num: i64,
    dictionary: Vec<u8>,
) -> Result<(), DbErr> {
    block_dictionaries::Entity::insert(block_dictionaries::ActiveModel {
        batch_num: Set(batch_num),
        dictionary: Set(dictionary),
    })
    .exec(db)
    .await?;
    Ok(())
}

pub async fn get_block_dict(
    db: &impl ConnectionTrait,
    batch_num: i64,
) -> Result<Option<Vec<u8>>, DbErr> {
    Ok(block_dictionaries::Entity::find_by_id(batch_num)
        .one(db)
        .await?
        .map(|row| row.dictionary))
}
