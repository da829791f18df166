use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_loyalty_tables::Migration),
            Box::new(m20240601_000003_create_discount_tables::Migration),
            Box::new(m20240601_000004_create_transaction_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Events::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Events::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Events::OrganizerId).uuid().not_null())
                        .col(ColumnDef::new(Events::Name).string().not_null())
                        .col(ColumnDef::new(Events::Location).string().not_null())
                        .col(
                            ColumnDef::new(Events::StartTime)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Events::EndTime)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Events::TotalSeats).integer().not_null())
                        .col(ColumnDef::new(Events::AvailableSeats).integer().not_null())
                        .col(
                            ColumnDef::new(Events::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Events::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Events::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::col(Events::AvailableSeats).gte(0))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Tickets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Tickets::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Tickets::EventId).uuid().not_null())
                        .col(ColumnDef::new(Tickets::Name).string().not_null())
                        .col(ColumnDef::new(Tickets::Price).big_integer().not_null())
                        .col(ColumnDef::new(Tickets::TotalSeats).integer().not_null())
                        .col(ColumnDef::new(Tickets::AvailableSeats).integer().not_null())
                        .col(
                            ColumnDef::new(Tickets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Tickets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::col(Tickets::AvailableSeats).gte(0))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tickets_event_id")
                                .from(Tickets::Table, Tickets::EventId)
                                .to(Events::Table, Events::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_tickets_event_id")
                        .table(Tickets::Table)
                        .col(Tickets::EventId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Tickets::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Events::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Events {
        Table,
        Id,
        OrganizerId,
        Name,
        Location,
        StartTime,
        EndTime,
        TotalSeats,
        AvailableSeats,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Tickets {
        Table,
        Id,
        EventId,
        Name,
        Price,
        TotalSeats,
        AvailableSeats,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_loyalty_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_loyalty_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Users::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                        .col(
                            ColumnDef::new(Users::PointBalance)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::col(Users::PointBalance).gte(0))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PointHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PointHistory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PointHistory::UserId).uuid().not_null())
                        .col(ColumnDef::new(PointHistory::Delta).big_integer().not_null())
                        .col(ColumnDef::new(PointHistory::Description).string().not_null())
                        .col(ColumnDef::new(PointHistory::TransactionId).uuid().null())
                        .col(
                            ColumnDef::new(PointHistory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_point_history_user_id")
                                .from(PointHistory::Table, PointHistory::UserId)
                                .to(Users::Table, Users::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_point_history_user_id")
                        .table(PointHistory::Table)
                        .col(PointHistory::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Referrals::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Referrals::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Referrals::ReferrerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Referrals::ReferredUserId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Referrals::IsUsed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Referrals::UsedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Referrals::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Referrals::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PointHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Users {
        Table,
        Id,
        Name,
        Email,
        PointBalance,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub enum PointHistory {
        Table,
        Id,
        UserId,
        Delta,
        Description,
        TransactionId,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Referrals {
        Table,
        Id,
        ReferrerId,
        ReferredUserId,
        IsUsed,
        UsedAt,
        CreatedAt,
    }
}

mod m20240601_000003_create_discount_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_discount_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Promotions::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Promotions::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Promotions::EventId).uuid().null())
                        .col(ColumnDef::new(Promotions::Code).string().not_null())
                        .col(
                            ColumnDef::new(Promotions::DiscountType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Promotions::Discount).big_integer().not_null())
                        .col(
                            ColumnDef::new(Promotions::StartDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Promotions::EndDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Promotions::MaxUses).integer().not_null())
                        .col(
                            ColumnDef::new(Promotions::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Promotions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Promotions::UpdatedAt)
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
                        .name("idx_promotions_code")
                        .table(Promotions::Table)
                        .col(Promotions::Code)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::UserId).uuid().not_null())
                        .col(ColumnDef::new(Coupons::EventId).uuid().null())
                        .col(ColumnDef::new(Coupons::Code).string().not_null())
                        .col(
                            ColumnDef::new(Coupons::DiscountType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Coupons::Discount).big_integer().not_null())
                        .col(
                            ColumnDef::new(Coupons::IsUsed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Coupons::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Promotions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Promotions {
        Table,
        Id,
        EventId,
        Code,
        DiscountType,
        Discount,
        StartDate,
        EndDate,
        MaxUses,
        UsedCount,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Coupons {
        Table,
        Id,
        UserId,
        EventId,
        Code,
        DiscountType,
        Discount,
        IsUsed,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_transaction_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_transaction_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Transactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Transactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::UserId).uuid().not_null())
                        .col(ColumnDef::new(Transactions::EventId).uuid().not_null())
                        .col(
                            ColumnDef::new(Transactions::TotalAmount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::PromotionId).uuid().null())
                        .col(ColumnDef::new(Transactions::PromotionCode).string().null())
                        .col(
                            ColumnDef::new(Transactions::PromotionDiscount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Transactions::CouponId).uuid().null())
                        .col(ColumnDef::new(Transactions::CouponCode).string().null())
                        .col(
                            ColumnDef::new(Transactions::CouponDiscount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Transactions::PointsUsed)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Transactions::FinalAmount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::Status)
                                .string_len(40)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::PaymentDeadline)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::PaymentProof).text().null())
                        .col(
                            ColumnDef::new(Transactions::ProofSubmittedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::ConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::CanceledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Transactions::CancelReason).string().null())
                        .col(
                            ColumnDef::new(Transactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .check(Expr::col(Transactions::FinalAmount).gte(0))
                        .to_owned(),
                )
                .await?;

            // The expiry sweep scans by status and deadline.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transactions_status_deadline")
                        .table(Transactions::Table)
                        .col(Transactions::Status)
                        .col(Transactions::PaymentDeadline)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transactions_user_id")
                        .table(Transactions::Table)
                        .col(Transactions::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TransactionTickets::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransactionTickets::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransactionTickets::TransactionId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransactionTickets::TicketId).uuid().not_null())
                        .col(
                            ColumnDef::new(TransactionTickets::TicketName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransactionTickets::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransactionTickets::UnitPrice)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransactionTickets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transaction_tickets_transaction_id")
                                .from(TransactionTickets::Table, TransactionTickets::TransactionId)
                                .to(Transactions::Table, Transactions::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Attendees::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Attendees::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Attendees::UserId).uuid().not_null())
                        .col(ColumnDef::new(Attendees::EventId).uuid().not_null())
                        .col(ColumnDef::new(Attendees::TransactionId).uuid().not_null())
                        .col(ColumnDef::new(Attendees::TicketId).uuid().not_null())
                        .col(ColumnDef::new(Attendees::TicketType).string().not_null())
                        .col(ColumnDef::new(Attendees::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Attendees::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_attendees_transaction_id")
                                .from(Attendees::Table, Attendees::TransactionId)
                                .to(Transactions::Table, Transactions::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_attendees_transaction_id")
                        .table(Attendees::Table)
                        .col(Attendees::TransactionId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Attendees::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TransactionTickets::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Transactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Transactions {
        Table,
        Id,
        UserId,
        EventId,
        TotalAmount,
        PromotionId,
        PromotionCode,
        PromotionDiscount,
        CouponId,
        CouponCode,
        CouponDiscount,
        PointsUsed,
        FinalAmount,
        Status,
        PaymentDeadline,
        PaymentProof,
        ProofSubmittedAt,
        ConfirmedAt,
        CanceledAt,
        CancelReason,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub enum TransactionTickets {
        Table,
        Id,
        TransactionId,
        TicketId,
        TicketName,
        Quantity,
        UnitPrice,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Attendees {
        Table,
        Id,
        UserId,
        EventId,
        TransactionId,
        TicketId,
        TicketType,
        Status,
        CreatedAt,
    }
}
