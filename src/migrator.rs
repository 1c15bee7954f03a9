use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_service_requests_table::Migration),
            Box::new(m20240601_000002_create_yard_tables::Migration),
            Box::new(m20240601_000003_create_forklift_tasks_table::Migration),
            Box::new(m20240601_000004_create_repair_tables::Migration),
            Box::new(m20240601_000005_create_seal_tables::Migration),
            Box::new(m20240601_000006_create_invoice_tables::Migration),
            Box::new(m20240615_000007_create_active_container_indexes::Migration),
        ]
    }
}

mod m20240601_000001_create_service_requests_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_service_requests_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ServiceRequests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ServiceRequests::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::RequestType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ServiceRequests::ContainerNo).string().null())
                        .col(ColumnDef::new(ServiceRequests::BookingNo).string().null())
                        .col(ColumnDef::new(ServiceRequests::CustomerId).uuid().not_null())
                        .col(
                            ColumnDef::new(ServiceRequests::ShippingLineId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::ContainerTypeId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::AppointmentAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::TimeIn)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::TimeOut)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::GateCheckedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(ServiceRequests::DriverName).string().null())
                        .col(ColumnDef::new(ServiceRequests::TruckPlate).string().null())
                        .col(ColumnDef::new(ServiceRequests::DriverPhone).string().null())
                        .col(
                            ColumnDef::new(ServiceRequests::RejectionReason)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::IsPaid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::HasInvoice)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::IsCheck)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::IsRepair)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::IsRepairRejected)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::DepotDeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::CustomerDeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(ServiceRequests::CreatedBy).string().not_null())
                        .col(
                            ColumnDef::new(ServiceRequests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceRequests::UpdatedAt)
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
                        .name("idx_service_requests_container_no")
                        .table(ServiceRequests::Table)
                        .col(ServiceRequests::ContainerNo)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_service_requests_customer_id")
                        .table(ServiceRequests::Table)
                        .col(ServiceRequests::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RequestTransitions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RequestTransitions::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(RequestTransitions::RequestId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequestTransitions::Seq).integer().not_null())
                        .col(
                            ColumnDef::new(RequestTransitions::FromStatus)
                                .string_len(32)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RequestTransitions::ToStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequestTransitions::Actor).string().not_null())
                        .col(ColumnDef::new(RequestTransitions::Note).string().null())
                        .col(
                            ColumnDef::new(RequestTransitions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_request_transitions_request")
                                .from(RequestTransitions::Table, RequestTransitions::RequestId)
                                .to(ServiceRequests::Table, ServiceRequests::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_request_transitions_seq")
                        .table(RequestTransitions::Table)
                        .col(RequestTransitions::RequestId)
                        .col(RequestTransitions::Seq)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RequestTransitions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ServiceRequests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ServiceRequests {
        Table,
        Id,
        RequestType,
        Status,
        ContainerNo,
        BookingNo,
        CustomerId,
        ShippingLineId,
        ContainerTypeId,
        AppointmentAt,
        TimeIn,
        TimeOut,
        GateCheckedAt,
        CompletedAt,
        DriverName,
        TruckPlate,
        DriverPhone,
        RejectionReason,
        IsPaid,
        HasInvoice,
        IsCheck,
        IsRepair,
        IsRepairRejected,
        DepotDeletedAt,
        CustomerDeletedAt,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RequestTransitions {
        Table,
        Id,
        RequestId,
        Seq,
        FromStatus,
        ToStatus,
        Actor,
        Note,
        CreatedAt,
    }
}

mod m20240601_000002_create_yard_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_yard_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(YardSlots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(YardSlots::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(YardSlots::Yard).string().not_null())
                        .col(ColumnDef::new(YardSlots::Block).string().not_null())
                        .col(ColumnDef::new(YardSlots::Slot).string().not_null())
                        .col(
                            ColumnDef::new(YardSlots::IsReserved)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(YardSlots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One row per physical position; also serialises lazy gate-slot creation.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_yard_slots_position")
                        .table(YardSlots::Table)
                        .col(YardSlots::Yard)
                        .col(YardSlots::Block)
                        .col(YardSlots::Slot)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(YardPlacements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(YardPlacements::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(YardPlacements::ContainerNo)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(YardPlacements::SlotId).uuid().not_null())
                        .col(
                            ColumnDef::new(YardPlacements::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(YardPlacements::PlacedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(YardPlacements::RemovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(YardPlacements::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_yard_placements_slot")
                                .from(YardPlacements::Table, YardPlacements::SlotId)
                                .to(YardSlots::Table, YardSlots::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_yard_placements_container_no")
                        .table(YardPlacements::Table)
                        .col(YardPlacements::ContainerNo)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(YardPlacements::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(YardSlots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum YardSlots {
        Table,
        Id,
        Yard,
        Block,
        Slot,
        IsReserved,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum YardPlacements {
        Table,
        Id,
        ContainerNo,
        SlotId,
        Status,
        PlacedAt,
        RemovedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_forklift_tasks_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_forklift_tasks_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ForkliftTasks::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ForkliftTasks::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ForkliftTasks::ContainerNo)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ForkliftTasks::RequestId).uuid().null())
                        .col(ColumnDef::new(ForkliftTasks::FromSlotId).uuid().null())
                        .col(ColumnDef::new(ForkliftTasks::ToSlotId).uuid().null())
                        .col(
                            ColumnDef::new(ForkliftTasks::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ForkliftTasks::AssignedDriver)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(ForkliftTasks::CancelReason).string().null())
                        .col(ColumnDef::new(ForkliftTasks::CreatedBy).string().not_null())
                        .col(
                            ColumnDef::new(ForkliftTasks::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ForkliftTasks::UpdatedAt)
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
                        .name("idx_forklift_tasks_container_no")
                        .table(ForkliftTasks::Table)
                        .col(ForkliftTasks::ContainerNo)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_forklift_tasks_status")
                        .table(ForkliftTasks::Table)
                        .col(ForkliftTasks::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ForkliftTasks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ForkliftTasks {
        Table,
        Id,
        ContainerNo,
        RequestId,
        FromSlotId,
        ToSlotId,
        Status,
        AssignedDriver,
        CancelReason,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_repair_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_repair_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RepairTickets::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairTickets::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::ContainerNo)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairTickets::RequestId).uuid().not_null())
                        .col(
                            ColumnDef::new(RepairTickets::Description)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(RepairTickets::CanRepair).boolean().null())
                        .col(
                            ColumnDef::new(RepairTickets::EstimatedCost)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::LaborCost)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(RepairTickets::CreatedBy).string().not_null())
                        .col(ColumnDef::new(RepairTickets::DecidedBy).string().null())
                        .col(
                            ColumnDef::new(RepairTickets::DecidedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairTickets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // The correlation key: exactly one ticket per request.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_repair_tickets_request_id")
                        .table(RepairTickets::Table)
                        .col(RepairTickets::RequestId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_repair_tickets_container_no")
                        .table(RepairTickets::Table)
                        .col(RepairTickets::ContainerNo)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RepairCostItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RepairCostItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(RepairCostItems::TicketId).uuid().not_null())
                        .col(
                            ColumnDef::new(RepairCostItems::Description)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairCostItems::Kind)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairCostItems::Quantity)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairCostItems::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairCostItems::LineTotal)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RepairCostItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_repair_cost_items_ticket")
                                .from(RepairCostItems::Table, RepairCostItems::TicketId)
                                .to(RepairTickets::Table, RepairTickets::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RepairCostItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RepairTickets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RepairTickets {
        Table,
        Id,
        ContainerNo,
        RequestId,
        Description,
        Status,
        CanRepair,
        EstimatedCost,
        LaborCost,
        CreatedBy,
        DecidedBy,
        DecidedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RepairCostItems {
        Table,
        Id,
        TicketId,
        Description,
        Kind,
        Quantity,
        UnitPrice,
        LineTotal,
        CreatedAt,
    }
}

mod m20240601_000005_create_seal_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_seal_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Seals::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Seals::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Seals::ShippingCompany).string().not_null())
                        .col(ColumnDef::new(Seals::SerialPrefix).string().not_null())
                        .col(ColumnDef::new(Seals::SerialStart).big_integer().not_null())
                        .col(
                            ColumnDef::new(Seals::QuantityPurchased)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Seals::QuantityExported)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Seals::QuantityRemaining)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Seals::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Seals::PurchaseDate).date().not_null())
                        .col(ColumnDef::new(Seals::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Seals::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Seals::UpdatedAt)
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
                        .name("idx_seals_company_fifo")
                        .table(Seals::Table)
                        .col(Seals::ShippingCompany)
                        .col(Seals::PurchaseDate)
                        .col(Seals::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SealUsageHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SealUsageHistory::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(SealUsageHistory::SealId).uuid().not_null())
                        .col(
                            ColumnDef::new(SealUsageHistory::SealNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SealUsageHistory::Serial)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SealUsageHistory::ContainerNo)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SealUsageHistory::BookingNo).string().null())
                        .col(ColumnDef::new(SealUsageHistory::RequestId).uuid().null())
                        .col(
                            ColumnDef::new(SealUsageHistory::RequestedBy)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SealUsageHistory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_seal_usage_history_seal")
                                .from(SealUsageHistory::Table, SealUsageHistory::SealId)
                                .to(Seals::Table, Seals::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // A serial is consumed at most once per lot.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_seal_usage_history_serial")
                        .table(SealUsageHistory::Table)
                        .col(SealUsageHistory::SealId)
                        .col(SealUsageHistory::Serial)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_seal_usage_history_container_no")
                        .table(SealUsageHistory::Table)
                        .col(SealUsageHistory::ContainerNo)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SealUsageHistory::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Seals::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Seals {
        Table,
        Id,
        ShippingCompany,
        SerialPrefix,
        SerialStart,
        QuantityPurchased,
        QuantityExported,
        QuantityRemaining,
        UnitPrice,
        PurchaseDate,
        Status,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SealUsageHistory {
        Table,
        Id,
        SealId,
        SealNumber,
        Serial,
        ContainerNo,
        BookingNo,
        RequestId,
        RequestedBy,
        CreatedAt,
    }
}

mod m20240601_000006_create_invoice_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000006_create_invoice_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Invoices::InvoiceNo).string().not_null())
                        .col(ColumnDef::new(Invoices::SourceModule).string().not_null())
                        .col(ColumnDef::new(Invoices::SourceId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::RequestId).uuid().null())
                        .col(ColumnDef::new(Invoices::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Invoices::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Invoices::Subtotal)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::TaxAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::TotalAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Invoices::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
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
                        .name("uq_invoices_source")
                        .table(Invoices::Table)
                        .col(Invoices::SourceModule)
                        .col(Invoices::SourceId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoices_request_id")
                        .table(Invoices::Table)
                        .col(Invoices::RequestId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InvoiceLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InvoiceLineItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InvoiceLineItems::InvoiceId).uuid().not_null())
                        .col(
                            ColumnDef::new(InvoiceLineItems::LineCode)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::Description)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceLineItems::Reference).string().null())
                        .col(
                            ColumnDef::new(InvoiceLineItems::Quantity)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::TaxRate)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::LineAmount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::LineTax)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLineItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoice_line_items_invoice")
                                .from(InvoiceLineItems::Table, InvoiceLineItems::InvoiceId)
                                .to(Invoices::Table, Invoices::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoice_line_items_invoice_id")
                        .table(InvoiceLineItems::Table)
                        .col(InvoiceLineItems::InvoiceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InvoiceLineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        InvoiceNo,
        SourceModule,
        SourceId,
        RequestId,
        Currency,
        Status,
        Subtotal,
        TaxAmount,
        TotalAmount,
        PaidAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InvoiceLineItems {
        Table,
        Id,
        InvoiceId,
        LineCode,
        Description,
        Reference,
        Quantity,
        UnitPrice,
        TaxRate,
        LineAmount,
        LineTax,
        CreatedAt,
    }
}

/// One open forklift task and one non-terminal request per container.
///
/// Partial indexes are written as SQL since the builder has no `WHERE` clause
/// for indexes; both supported backends accept this form.
mod m20240615_000007_create_active_container_indexes {
    use sea_orm_migration::prelude::*;
    use sea_orm_migration::sea_orm::ConnectionTrait;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240615_000007_create_active_container_indexes"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let db = manager.get_connection();
            db.execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_forklift_tasks_open_container \
                 ON forklift_tasks (container_no) \
                 WHERE status IN ('PENDING', 'ASSIGNED', 'IN_PROGRESS', 'PENDING_APPROVAL')",
            )
            .await?;
            db.execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_service_requests_active_container \
                 ON service_requests (container_no) \
                 WHERE container_no IS NOT NULL \
                 AND status NOT IN ('GATE_OUT', 'COMPLETED', 'REJECTED')",
            )
            .await?;
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let db = manager.get_connection();
            db.execute_unprepared("DROP INDEX IF EXISTS uq_service_requests_active_container")
                .await?;
            db.execute_unprepared("DROP INDEX IF EXISTS uq_forklift_tasks_open_container")
                .await?;
            Ok(())
        }
    }
}
