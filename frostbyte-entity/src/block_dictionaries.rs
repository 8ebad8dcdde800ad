//! `SeaORM` Entity.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "block_dictionaries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub batch_num: i64,
    #[sea_orm(column_type = "VarBinary(StringLen::None)")]
    pub dictionary: Vec<u8>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
