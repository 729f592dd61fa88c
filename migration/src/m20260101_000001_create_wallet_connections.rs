use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WalletConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletConnections::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WalletConnections::Address)
                            .string_len(18) // 0x + 16 hex digits
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WalletConnections::ConnectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_wallet_connections_address_time")
                            .col(WalletConnections::Address)
                            .col(WalletConnections::ConnectedAt),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WalletConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WalletConnections {
    Table,
    Id,
    Address,
    ConnectedAt,
}
