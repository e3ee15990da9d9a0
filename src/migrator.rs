use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_services_table::Migration),
            Box::new(m20240601_000002_create_cart_tables::Migration),
            Box::new(m20240601_000003_create_orders_table::Migration),
            Box::new(m20240601_000004_create_order_items_table::Migration),
            Box::new(m20240601_000005_create_order_transitions_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_services_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_services_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Catalog owned by the storefront admin; read-only here.
            // Money columns hold canonical decimal text.
            manager
                .create_table(
                    Table::create()
                        .table(Services::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Services::Id).string().primary_key().not_null())
                        .col(ColumnDef::new(Services::Name).string().not_null())
                        .col(ColumnDef::new(Services::UnitPrice).text().not_null())
                        .col(ColumnDef::new(Services::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Services::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Services::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Services::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Services {
        Table,
        Id,
        Name,
        UnitPrice,
        Currency,
        Active,
        CreatedAt,
    }
}

mod m20240601_000002_create_cart_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_cart_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Carts::SessionKey).string().not_null())
                        .col(
                            ColumnDef::new(Carts::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Carts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_carts_session_key")
                        .table(Carts::Table)
                        .col(Carts::SessionKey)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ServiceId).string().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::AddedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_cart_id")
                                .from(CartItems::Table, CartItems::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Conflict target of the quantity upsert
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_cart_items_cart_service")
                        .table(CartItems::Table)
                        .col(CartItems::CartId)
                        .col(CartItems::ServiceId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        SessionKey,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        CartId,
        ServiceId,
        Quantity,
        AddedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_orders_table"
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
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::SessionKey).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).string().null())
                        .col(ColumnDef::new(Orders::IdempotencyKey).string().not_null())
                        .col(
                            ColumnDef::new(Orders::Status)
                                .string()
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Subtotal).text().not_null())
                        .col(ColumnDef::new(Orders::TaxRate).text().not_null())
                        .col(ColumnDef::new(Orders::TaxAmount).text().not_null())
                        .col(ColumnDef::new(Orders::GrandTotal).text().not_null())
                        .col(ColumnDef::new(Orders::CustomerName).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerPhone).string().null())
                        .col(ColumnDef::new(Orders::CustomerAddress).text().null())
                        .col(ColumnDef::new(Orders::PaymentReference).string().null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Checkout deduplication
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("ux_orders_session_idempotency")
                        .table(Orders::Table)
                        .col(Orders::SessionKey)
                        .col(Orders::IdempotencyKey)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status_created_at")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .col(Orders::CustomerId)
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

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        SessionKey,
        CustomerId,
        IdempotencyKey,
        Status,
        Currency,
        Subtotal,
        TaxRate,
        TaxAmount,
        GrandTotal,
        CustomerName,
        CustomerEmail,
        CustomerPhone,
        CustomerAddress,
        PaymentReference,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_order_items_table {
    use super::m20240601_000003_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_order_items_table"
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
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::LineNumber).integer().not_null())
                        .col(ColumnDef::new(OrderItems::ServiceId).string().not_null())
                        .col(ColumnDef::new(OrderItems::Name).string().not_null())
                        .col(
                            ColumnDef::new(OrderItems::UnitPrice)
                                .text()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::LineTotal)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
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

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        LineNumber,
        ServiceId,
        Name,
        UnitPrice,
        Quantity,
        LineTotal,
        CreatedAt,
    }
}

mod m20240601_000005_create_order_transitions_table {
    use super::m20240601_000003_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_order_transitions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Append-only audit log of status changes
            manager
                .create_table(
                    Table::create()
                        .table(OrderTransitions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderTransitions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderTransitions::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderTransitions::FromStatus).string().not_null())
                        .col(ColumnDef::new(OrderTransitions::ToStatus).string().not_null())
                        .col(ColumnDef::new(OrderTransitions::Trigger).string().not_null())
                        .col(ColumnDef::new(OrderTransitions::Note).text().null())
                        .col(
                            ColumnDef::new(OrderTransitions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_transitions_order_id")
                                .from(OrderTransitions::Table, OrderTransitions::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_transitions_order_created")
                        .table(OrderTransitions::Table)
                        .col(OrderTransitions::OrderId)
                        .col(OrderTransitions::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderTransitions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderTransitions {
        Table,
        Id,
        OrderId,
        FromStatus,
        ToStatus,
        Trigger,
        Note,
        CreatedAt,
    }
}
