use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum Role {
    Table,
    Id,
    OrgId,
    Uid,
    Name,
    Version,
    Created,
    Updated,
}

#[derive(DeriveIden)]
enum Permission {
    Table,
    Id,
    RoleId,
    Action,
    Scope,
    Created,
    Updated,
}

#[derive(DeriveIden)]
enum UserRole {
    Table,
    Id,
    OrgId,
    UserId,
    RoleId,
    Created,
}

#[derive(DeriveIden)]
enum TeamRole {
    Table,
    Id,
    OrgId,
    TeamId,
    RoleId,
    Created,
}

#[derive(DeriveIden)]
enum BuiltinRole {
    Table,
    Id,
    OrgId,
    Role,
    RoleId,
    Created,
}

/// SQLite only auto-increments `INTEGER PRIMARY KEY`, which is 64-bit there.
fn id_column<T: IntoIden>(backend: DatabaseBackend, col: T) -> ColumnDef {
    let mut def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Sqlite => def.integer(),
        _ => def.big_integer(),
    };
    def.not_null().auto_increment().primary_key().to_owned()
}

fn role_fk<T: IntoIden + 'static, C: IntoIden>(name: &str, table: T, col: C) -> ForeignKeyCreateStatement {
    ForeignKey::create()
        .name(name)
        .from(table, col)
        .to(Role::Table, Role::Id)
        .on_delete(ForeignKeyAction::Cascade)
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(Role::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, Role::Id))
                    .col(ColumnDef::new(Role::OrgId).big_integer().not_null())
                    .col(ColumnDef::new(Role::Uid).string().not_null().unique_key())
                    .col(ColumnDef::new(Role::Name).string().not_null())
                    .col(
                        ColumnDef::new(Role::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Role::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Role::Updated)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_role_org_name")
                    .table(Role::Table)
                    .col(Role::OrgId)
                    .col(Role::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Permission::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, Permission::Id))
                    .col(ColumnDef::new(Permission::RoleId).big_integer().not_null())
                    .col(ColumnDef::new(Permission::Action).string().not_null())
                    .col(ColumnDef::new(Permission::Scope).string().not_null())
                    .col(
                        ColumnDef::new(Permission::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Permission::Updated)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(&mut role_fk(
                        "fk_permission_role",
                        Permission::Table,
                        Permission::RoleId,
                    ))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_permission_role_scope_action")
                    .table(Permission::Table)
                    .col(Permission::RoleId)
                    .col(Permission::Scope)
                    .col(Permission::Action)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserRole::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, UserRole::Id))
                    .col(ColumnDef::new(UserRole::OrgId).big_integer().not_null())
                    .col(ColumnDef::new(UserRole::UserId).big_integer().not_null())
                    .col(ColumnDef::new(UserRole::RoleId).big_integer().not_null())
                    .col(
                        ColumnDef::new(UserRole::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(&mut role_fk(
                        "fk_user_role_role",
                        UserRole::Table,
                        UserRole::RoleId,
                    ))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_role_org_user_role")
                    .table(UserRole::Table)
                    .col(UserRole::OrgId)
                    .col(UserRole::UserId)
                    .col(UserRole::RoleId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TeamRole::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, TeamRole::Id))
                    .col(ColumnDef::new(TeamRole::OrgId).big_integer().not_null())
                    .col(ColumnDef::new(TeamRole::TeamId).big_integer().not_null())
                    .col(ColumnDef::new(TeamRole::RoleId).big_integer().not_null())
                    .col(
                        ColumnDef::new(TeamRole::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(&mut role_fk(
                        "fk_team_role_role",
                        TeamRole::Table,
                        TeamRole::RoleId,
                    ))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_team_role_org_team_role")
                    .table(TeamRole::Table)
                    .col(TeamRole::OrgId)
                    .col(TeamRole::TeamId)
                    .col(TeamRole::RoleId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BuiltinRole::Table)
                    .if_not_exists()
                    .col(&mut id_column(backend, BuiltinRole::Id))
                    .col(ColumnDef::new(BuiltinRole::OrgId).big_integer().not_null())
                    .col(ColumnDef::new(BuiltinRole::Role).string_len(32).not_null())
                    .col(ColumnDef::new(BuiltinRole::RoleId).big_integer().not_null())
                    .col(
                        ColumnDef::new(BuiltinRole::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(&mut role_fk(
                        "fk_builtin_role_role",
                        BuiltinRole::Table,
                        BuiltinRole::RoleId,
                    ))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_builtin_role_org_role_role")
                    .table(BuiltinRole::Table)
                    .col(BuiltinRole::OrgId)
                    .col(BuiltinRole::Role)
                    .col(BuiltinRole::RoleId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            BuiltinRole::Table.into_iden(),
            TeamRole::Table.into_iden(),
            UserRole::Table.into_iden(),
            Permission::Table.into_iden(),
            Role::Table.into_iden(),
        ] {
            manager
                .drop_table(Table::drop().table(table).if_exists().to_owned())
                .await?;
        }
        Ok(())
    }
}
