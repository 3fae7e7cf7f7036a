//! PostgreSQL storage implementation

use super::traits::*;
use crate::error::TrustGridError;
use crate::types::{
    CertificateRef, Citizen, ConditionalUpdate, ConsentRecord, ConsentStatus, Credential,
    Organization, ProfileField, ProfileUpdate, RegistrationProfile, VerificationUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, Row};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

const ORGANIZATION_COLUMNS: &str = "id, name, verification_status, category, policy_text, \
     registration, certificate, created_at";
const CREDENTIAL_COLUMNS: &str = "id, name, key_hash, status, created_at, organization_id";
const CITIZEN_COLUMNS: &str = "username, profile, manual_approval_required, created_at";
const CONSENT_COLUMNS: &str = "id, citizen_username, organization_id, organization_name, field, \
     purpose, status, approval_method, compliance_reason, created_at, resolved_at";

/// PostgreSQL-backed storage.
///
/// Conditional transitions are single `UPDATE ... WHERE <precondition>
/// RETURNING` statements; a follow-up read only classifies a miss.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> StorageResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS trustgrid_organizations (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                verification_status TEXT NOT NULL,
                category TEXT NOT NULL,
                policy_text TEXT NULL,
                registration JSONB NULL,
                certificate JSONB NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trustgrid_credentials (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                key_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                organization_id UUID NOT NULL REFERENCES trustgrid_organizations (id)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_trustgrid_credentials_status
                ON trustgrid_credentials (status)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trustgrid_citizens (
                username TEXT PRIMARY KEY,
                profile JSONB NOT NULL DEFAULT '{}'::jsonb,
                manual_approval_required BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trustgrid_consent_requests (
                id UUID PRIMARY KEY,
                citizen_username TEXT NOT NULL,
                organization_id UUID NOT NULL,
                organization_name TEXT NOT NULL,
                field TEXT NOT NULL,
                purpose TEXT NOT NULL,
                status TEXT NOT NULL,
                approval_method TEXT NOT NULL,
                compliance_reason TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                resolved_at TIMESTAMPTZ NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_trustgrid_consent_citizen
                ON trustgrid_consent_requests (citizen_username, created_at DESC)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_trustgrid_consent_org
                ON trustgrid_consent_requests (organization_id, created_at DESC)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    TrustGridError::storage(format!("postgres schema create failed: {e}"))
                })?;
        }

        info!("TrustGrid postgres schema ready");
        Ok(())
    }
}

#[async_trait]
impl OrganizationStorage for PostgresStorage {
    async fn insert_organization(&self, organization: &Organization) -> StorageResult<()> {
        write_organization(&self.pool, organization).await
    }

    async fn insert_organization_with_credential(
        &self,
        organization: &Organization,
        credential: &Credential,
    ) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres begin failed: {e}")))?;
        write_organization(&mut *tx, organization).await?;
        write_credential(&mut *tx, credential).await?;
        tx.commit()
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres commit failed: {e}")))
    }

    async fn get_organization(&self, id: Uuid) -> StorageResult<Option<Organization>> {
        let query =
            format!("SELECT {ORGANIZATION_COLUMNS} FROM trustgrid_organizations WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn find_organization_by_name(&self, name: &str) -> StorageResult<Option<Organization>> {
        let query =
            format!("SELECT {ORGANIZATION_COLUMNS} FROM trustgrid_organizations WHERE name = $1");
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn apply_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> StorageResult<ConditionalUpdate<Organization>> {
        let query = format!(
            r#"
            UPDATE trustgrid_organizations
            SET name = $2,
                category = $3,
                registration = $4,
                certificate = $5,
                verification_status = $6
            WHERE id = $1 AND verification_status <> 'verified'
            RETURNING {ORGANIZATION_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&update.name)
            .bind(update.category.as_str())
            .bind(Json(&update.registration))
            .bind(Json(&update.certificate))
            .bind(update.status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| write_error("verification update", &update.name, e))?;

        match row {
            Some(row) => Ok(ConditionalUpdate::Applied(organization_from_row(&row)?)),
            None => Ok(match self.get_organization(id).await? {
                Some(current) => ConditionalUpdate::Rejected(current),
                None => ConditionalUpdate::Missing,
            }),
        }
    }

    async fn set_policy_text(
        &self,
        id: Uuid,
        policy_text: &str,
    ) -> StorageResult<ConditionalUpdate<Organization>> {
        let query = format!(
            r#"
            UPDATE trustgrid_organizations
            SET policy_text = $2
            WHERE id = $1 AND verification_status = 'verified'
            RETURNING {ORGANIZATION_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(policy_text)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres policy update failed: {e}")))?;

        match row {
            Some(row) => Ok(ConditionalUpdate::Applied(organization_from_row(&row)?)),
            None => Ok(match self.get_organization(id).await? {
                Some(current) => ConditionalUpdate::Rejected(current),
                None => ConditionalUpdate::Missing,
            }),
        }
    }
}

#[async_trait]
impl CredentialStorage for PostgresStorage {
    async fn insert_credential(&self, credential: &Credential) -> StorageResult<()> {
        write_credential(&self.pool, credential).await
    }

    async fn get_credential(&self, id: Uuid) -> StorageResult<Option<Credential>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM trustgrid_credentials WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn list_active_credentials(&self) -> StorageResult<Vec<Credential>> {
        let query = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM trustgrid_credentials WHERE status = 'active'"
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn list_credentials_for_organization(
        &self,
        organization_id: Uuid,
    ) -> StorageResult<Vec<Credential>> {
        let query = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM trustgrid_credentials \
             WHERE organization_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn revoke_credential(
        &self,
        id: Uuid,
        organization_id: Uuid,
    ) -> StorageResult<ConditionalUpdate<Credential>> {
        let query = format!(
            r#"
            UPDATE trustgrid_credentials
            SET status = 'revoked'
            WHERE id = $1 AND organization_id = $2 AND status = 'active'
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres revoke failed: {e}")))?;

        if let Some(row) = row {
            return Ok(ConditionalUpdate::Applied(credential_from_row(&row)?));
        }
        Ok(match self.get_credential(id).await? {
            Some(current) if current.organization_id == organization_id => {
                ConditionalUpdate::Rejected(current)
            }
            _ => ConditionalUpdate::Missing,
        })
    }
}

#[async_trait]
impl CitizenStorage for PostgresStorage {
    async fn insert_citizen(&self, citizen: &Citizen) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trustgrid_citizens (
                username, profile, manual_approval_required, created_at
            )
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&citizen.username)
        .bind(Json(&citizen.profile))
        .bind(citizen.manual_approval_required)
        .bind(citizen.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("citizen insert", &citizen.username, e))?;

        Ok(())
    }

    async fn get_citizen(&self, username: &str) -> StorageResult<Option<Citizen>> {
        let query = format!("SELECT {CITIZEN_COLUMNS} FROM trustgrid_citizens WHERE username = $1");
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        row.as_ref().map(citizen_from_row).transpose()
    }

    async fn update_citizen(
        &self,
        username: &str,
        update: &ProfileUpdate,
    ) -> StorageResult<Option<Citizen>> {
        let (cleared, set): (Vec<_>, Vec<_>) = update
            .fields
            .iter()
            .partition(|(_, value)| value.is_empty());
        let set: BTreeMap<ProfileField, String> = set
            .into_iter()
            .map(|(field, value)| (*field, value.clone()))
            .collect();
        let cleared: Vec<String> = cleared
            .into_iter()
            .map(|(field, _)| field.as_str().to_string())
            .collect();

        let query = format!(
            r#"
            UPDATE trustgrid_citizens
            SET profile = (profile || $2::jsonb) - $3::text[],
                manual_approval_required = COALESCE($4, manual_approval_required)
            WHERE username = $1
            RETURNING {CITIZEN_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(username)
            .bind(Json(&set))
            .bind(&cleared)
            .bind(update.manual_approval_required)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres citizen update failed: {e}")))?;
        row.as_ref().map(citizen_from_row).transpose()
    }
}

#[async_trait]
impl ConsentStorage for PostgresStorage {
    async fn insert_consent(&self, record: &ConsentRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trustgrid_consent_requests (
                id, citizen_username, organization_id, organization_name, field,
                purpose, status, approval_method, compliance_reason, created_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(&record.citizen_username)
        .bind(record.organization_id)
        .bind(&record.organization_name)
        .bind(record.field.as_str())
        .bind(&record.purpose)
        .bind(record.status.as_str())
        .bind(record.approval_method.as_str())
        .bind(&record.compliance_reason)
        .bind(record.created_at)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TrustGridError::storage(format!("postgres consent insert failed: {e}")))?;

        Ok(())
    }

    async fn get_consent(&self, id: Uuid) -> StorageResult<Option<ConsentRecord>> {
        let query =
            format!("SELECT {CONSENT_COLUMNS} FROM trustgrid_consent_requests WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        row.as_ref().map(consent_from_row).transpose()
    }

    async fn resolve_consent(
        &self,
        id: Uuid,
        status: ConsentStatus,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<ConditionalUpdate<ConsentRecord>> {
        let query = format!(
            r#"
            UPDATE trustgrid_consent_requests
            SET status = $2, resolved_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {CONSENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(status.as_str())
            .bind(resolved_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres consent update failed: {e}")))?;

        match row {
            Some(row) => Ok(ConditionalUpdate::Applied(consent_from_row(&row)?)),
            None => Ok(match self.get_consent(id).await? {
                Some(current) => ConditionalUpdate::Rejected(current),
                None => ConditionalUpdate::Missing,
            }),
        }
    }

    async fn list_consents_for_citizen(
        &self,
        username: &str,
        status: Option<ConsentStatus>,
    ) -> StorageResult<Vec<ConsentRecord>> {
        let query = format!(
            "SELECT {CONSENT_COLUMNS} FROM trustgrid_consent_requests \
             WHERE citizen_username = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(username)
            .bind(status.map(ConsentStatus::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        rows.iter().map(consent_from_row).collect()
    }

    async fn list_consents_for_organization(
        &self,
        organization_id: Uuid,
    ) -> StorageResult<Vec<ConsentRecord>> {
        let query = format!(
            "SELECT {CONSENT_COLUMNS} FROM trustgrid_consent_requests \
             WHERE organization_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TrustGridError::storage(format!("postgres load failed: {e}")))?;
        rows.iter().map(consent_from_row).collect()
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }
}

async fn write_organization<'e, E>(executor: E, organization: &Organization) -> StorageResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO trustgrid_organizations (
            id, name, verification_status, category, policy_text,
            registration, certificate, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(organization.id)
    .bind(&organization.name)
    .bind(organization.verification_status.as_str())
    .bind(organization.category.as_str())
    .bind(&organization.policy_text)
    .bind(organization.registration.as_ref().map(Json))
    .bind(organization.certificate.as_ref().map(Json))
    .bind(organization.created_at)
    .execute(executor)
    .await
    .map_err(|e| write_error("organization insert", &organization.name, e))?;

    Ok(())
}

async fn write_credential<'e, E>(executor: E, credential: &Credential) -> StorageResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO trustgrid_credentials (
            id, name, key_hash, status, created_at, organization_id
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(credential.id)
    .bind(&credential.name)
    .bind(&credential.key_hash)
    .bind(credential.status.as_str())
    .bind(credential.created_at)
    .bind(credential.organization_id)
    .execute(executor)
    .await
    .map_err(|e| write_error("credential insert", &credential.id.to_string(), e))?;

    Ok(())
}

fn write_error(operation: &str, key: &str, err: sqlx::Error) -> TrustGridError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return TrustGridError::Conflict(format!("'{key}' is already registered"));
        }
    }
    TrustGridError::storage(format!("postgres {operation} failed: {err}"))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| TrustGridError::storage(format!("postgres decode {name} failed: {e}")))
}

fn organization_from_row(row: &PgRow) -> StorageResult<Organization> {
    let status: String = column(row, "verification_status")?;
    let category: String = column(row, "category")?;
    let registration: Option<Json<RegistrationProfile>> = column(row, "registration")?;
    let certificate: Option<Json<CertificateRef>> = column(row, "certificate")?;

    Ok(Organization {
        id: column(row, "id")?,
        name: column(row, "name")?,
        verification_status: status.parse()?,
        category: category.parse().map_err(|_| {
            TrustGridError::storage(format!("unknown category '{category}' in postgres"))
        })?,
        policy_text: column(row, "policy_text")?,
        registration: registration.map(|Json(inner)| inner),
        certificate: certificate.map(|Json(inner)| inner),
        created_at: column(row, "created_at")?,
    })
}

fn credential_from_row(row: &PgRow) -> StorageResult<Credential> {
    let status: String = column(row, "status")?;
    Ok(Credential {
        id: column(row, "id")?,
        name: column(row, "name")?,
        key_hash: column(row, "key_hash")?,
        status: status.parse()?,
        created_at: column(row, "created_at")?,
        organization_id: column(row, "organization_id")?,
    })
}

fn citizen_from_row(row: &PgRow) -> StorageResult<Citizen> {
    let Json(profile): Json<BTreeMap<ProfileField, String>> = column(row, "profile")?;
    Ok(Citizen {
        username: column(row, "username")?,
        profile,
        manual_approval_required: column(row, "manual_approval_required")?,
        created_at: column(row, "created_at")?,
    })
}

fn consent_from_row(row: &PgRow) -> StorageResult<ConsentRecord> {
    let field: String = column(row, "field")?;
    let status: String = column(row, "status")?;
    let method: String = column(row, "approval_method")?;

    Ok(ConsentRecord {
        id: column(row, "id")?,
        citizen_username: column(row, "citizen_username")?,
        organization_id: column(row, "organization_id")?,
        organization_name: column(row, "organization_name")?,
        field: field.parse().map_err(|_| {
            TrustGridError::storage(format!("unknown field '{field}' in postgres"))
        })?,
        purpose: column(row, "purpose")?,
        status: status.parse()?,
        approval_method: method.parse()?,
        compliance_reason: column(row, "compliance_reason")?,
        created_at: column(row, "created_at")?,
        resolved_at: column(row, "resolved_at")?,
    })
}
