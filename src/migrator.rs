use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_orders_table::Migration),
            Box::new(m20240601_000002_create_order_items_table::Migration),
            Box::new(m20240601_000003_create_payments_table::Migration),
        ]
    }
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    OrderNumber,
    UserId,
    Subtotal,
    ShippingCost,
    Total,
    Status,
    PaymentMethod,
    PaymentConfirmed,
    ShippingStreet,
    ShippingNumber,
    ShippingComplement,
    ShippingNeighborhood,
    ShippingCity,
    ShippingState,
    ShippingZipCode,
    Notes,
    TrackingCode,
    CreatedAt,
    UpdatedAt,
    ShippedAt,
    DeliveredAt,
    Version,
}

#[derive(DeriveIden)]
enum OrderItems {
    Table,
    Id,
    OrderId,
    ProductId,
    Quantity,
    UnitPrice,
    Subtotal,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
    TransactionId,
    OrderId,
    PaymentMethod,
    Status,
    Amount,
    Currency,
    ProcessingFee,
    RefundAmount,
    GatewayTransactionId,
    GatewayResponse,
    GatewayReference,
    CardLastFour,
    CardBrand,
    CardHolderName,
    PixKey,
    PixQrCode,
    PixCopyPaste,
    BoletoNumber,
    BoletoBarcode,
    BoletoDueDate,
    BoletoUrl,
    CreatedAt,
    UpdatedAt,
    AuthorizedAt,
    CapturedAt,
    ConfirmedAt,
    CancelledAt,
    ExpiresAt,
    Notes,
    FailureReason,
    Version,
}

fn money(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .decimal_len(16, 2)
        .not_null()
        .default(0)
        .to_owned()
}

fn timestamp(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .to_owned()
}

fn nullable_timestamp(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .null()
        .to_owned()
}

mod m20240601_000001_create_orders_table {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Orders::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(50)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).big_integer().not_null())
                        .col(money(Orders::Subtotal))
                        .col(money(Orders::ShippingCost))
                        .col(money(Orders::Total))
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentMethod)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::PaymentConfirmed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::ShippingStreet).string_len(200).not_null())
                        .col(ColumnDef::new(Orders::ShippingNumber).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::ShippingComplement).string_len(100).null())
                        .col(
                            ColumnDef::new(Orders::ShippingNeighborhood)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::ShippingCity).string_len(100).not_null())
                        .col(ColumnDef::new(Orders::ShippingState).string_len(50).not_null())
                        .col(ColumnDef::new(Orders::ShippingZipCode).string_len(10).not_null())
                        .col(ColumnDef::new(Orders::Notes).text().null())
                        .col(ColumnDef::new(Orders::TrackingCode).string_len(100).null())
                        .col(timestamp(Orders::CreatedAt))
                        .col(timestamp(Orders::UpdatedAt))
                        .col(nullable_timestamp(Orders::ShippedAt))
                        .col(nullable_timestamp(Orders::DeliveredAt))
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_user_status")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_created_status")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }
}

mod m20240601_000002_create_order_items_table {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).big_integer().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).big_integer().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(money(OrderItems::UnitPrice))
                        .col(money(OrderItems::Subtotal))
                        .col(timestamp(OrderItems::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }
}

mod m20240601_000003_create_payments_table {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Payments::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Payments::TransactionId)
                                .string_len(40)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::OrderId).big_integer().not_null())
                        .col(
                            ColumnDef::new(Payments::PaymentMethod)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::Status).string_len(20).not_null())
                        .col(money(Payments::Amount))
                        .col(ColumnDef::new(Payments::Currency).string_len(3).not_null())
                        .col(money(Payments::ProcessingFee))
                        .col(money(Payments::RefundAmount))
                        .col(ColumnDef::new(Payments::GatewayTransactionId).string_len(100).null())
                        .col(ColumnDef::new(Payments::GatewayResponse).string_len(500).null())
                        .col(ColumnDef::new(Payments::GatewayReference).string_len(100).null())
                        .col(ColumnDef::new(Payments::CardLastFour).string_len(4).null())
                        .col(ColumnDef::new(Payments::CardBrand).string_len(30).null())
                        .col(ColumnDef::new(Payments::CardHolderName).string_len(100).null())
                        .col(ColumnDef::new(Payments::PixKey).string_len(100).null())
                        .col(ColumnDef::new(Payments::PixQrCode).string_len(200).null())
                        .col(ColumnDef::new(Payments::PixCopyPaste).text().null())
                        .col(ColumnDef::new(Payments::BoletoNumber).string_len(50).null())
                        .col(ColumnDef::new(Payments::BoletoBarcode).string_len(60).null())
                        .col(nullable_timestamp(Payments::BoletoDueDate))
                        .col(ColumnDef::new(Payments::BoletoUrl).string_len(200).null())
                        .col(timestamp(Payments::CreatedAt))
                        .col(timestamp(Payments::UpdatedAt))
                        .col(nullable_timestamp(Payments::AuthorizedAt))
                        .col(nullable_timestamp(Payments::CapturedAt))
                        .col(nullable_timestamp(Payments::ConfirmedAt))
                        .col(nullable_timestamp(Payments::CancelledAt))
                        .col(nullable_timestamp(Payments::ExpiresAt))
                        .col(ColumnDef::new(Payments::Notes).text().null())
                        .col(ColumnDef::new(Payments::FailureReason).string_len(500).null())
                        .col(
                            ColumnDef::new(Payments::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_order_id")
                                .from(Payments::Table, Payments::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_payments_status_expires")
                        .table(Payments::Table)
                        .col(Payments::Status)
                        .col(Payments::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_payments_gateway_transaction_id")
                        .table(Payments::Table)
                        .col(Payments::GatewayTransactionId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }
}
